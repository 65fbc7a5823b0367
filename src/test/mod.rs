
use crate::clock::mock::MockClock;
use crate::config::{Medium, StackConfig, INBOX_LIMIT};
use crate::device::mock::MockDevice;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::stack::{SocketHandle, Stack};
use crate::tcp::{SocketHandler, Status};
use crate::wire::{checksum, eth, ip, MSS_OPTION};
use crate::Clock;
use etherparse::{Ipv4HeaderSlice, TcpHeaderSlice};
use packets::{parse_tcp_packet, parse_udp_packet, tcp_payload, udp_payload, PacketFactory};
use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CLIENT: &str = "10.0.0.2";
const LOCAL: &str = "10.0.0.1";
const SERVER: &str = "10.0.0.9";

fn setup() -> (MockDevice, Arc<MockClock>, Stack) {
    let dev = MockDevice::new();
    let clock = Arc::new(MockClock::new(Instant::now()));
    let stack = Stack::new(
        Box::new(dev.clone()),
        clock.clone(),
        StackConfig::default(),
    );
    (dev, clock, stack)
}

/// Records every callback so tests can count them.
#[derive(Default)]
struct Journal {
    accepted: Vec<Endpoint>,
    received: Vec<Vec<u8>>,
    disconnected: Vec<Endpoint>,
}

struct Recorder {
    journal: Rc<RefCell<Journal>>,
    echo: bool,
}

impl SocketHandler for Recorder {
    fn on_accepted(&mut self, remote: Endpoint) {
        self.journal.borrow_mut().accepted.push(remote);
    }

    fn on_received(&mut self, _remote: Endpoint, payload: &[u8]) -> Option<Vec<u8>> {
        self.journal.borrow_mut().received.push(payload.to_vec());
        self.echo.then(|| payload.to_vec())
    }

    fn on_disconnected(&mut self, remote: Endpoint) {
        self.journal.borrow_mut().disconnected.push(remote);
    }
}

fn recorder(stack: &mut Stack, h: SocketHandle, echo: bool) -> Rc<RefCell<Journal>> {
    let journal = Rc::new(RefCell::new(Journal::default()));
    stack
        .set_handler(
            h,
            Box::new(Recorder {
                journal: journal.clone(),
                echo,
            }),
        )
        .unwrap();
    journal
}

/// Client 10.0.0.2:12345 opens a connection to port 80; returns our ISN.
fn establish_connection(dev: &MockDevice, stack: &mut Stack) -> u32 {
    // SYN
    let syn = PacketFactory::syn(CLIENT, LOCAL, 12345, 80, 1000);
    stack.handle_frame(&syn).unwrap();

    // Get SYN-ACK details
    let syn_ack = dev.last_sent_packet().unwrap();
    let (_, tcp_hdr) = parse_tcp_packet(&syn_ack);
    let server_isn = tcp_hdr.sequence_number();

    // ACK
    let ack = PacketFactory::ack(CLIENT, LOCAL, 12345, 80, 1001, server_isn.wrapping_add(1));
    stack.handle_frame(&ack).unwrap();
    dev.clear_sent(); // Clear handshake packets for cleaner test output

    server_isn
}

/// A far end at 10.0.0.9:80 that accepts connections and acknowledges data.
fn scripted_server(dev: &MockDevice) {
    dev.set_peer(Box::new(|frame: &[u8]| {
        let (ip, tcp) = parse_tcp_packet(frame);
        let dst = ip.destination_addr();
        if dst != SERVER.parse::<Ipv4Addr>().unwrap() {
            return Vec::new();
        }
        let payload = tcp_payload(frame);
        if tcp.syn() && !tcp.ack() {
            vec![PacketFactory::syn_ack(
                SERVER,
                LOCAL,
                80,
                tcp.source_port(),
                5000,
                tcp.sequence_number().wrapping_add(1),
            )]
        } else if !payload.is_empty() {
            vec![PacketFactory::ack(
                SERVER,
                LOCAL,
                80,
                tcp.source_port(),
                tcp.acknowledgment_number(),
                tcp.sequence_number().wrapping_add(payload.len() as u32),
            )]
        } else {
            Vec::new()
        }
    }));
}

fn server() -> Endpoint {
    Endpoint::new(SERVER.parse().unwrap(), 80)
}

// Now the actual tests
#[test]
fn test_tcp_handshake() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();

    // Client sends SYN
    let syn = PacketFactory::syn(CLIENT, LOCAL, 12345, 80, 1000);
    stack.handle_frame(&syn).unwrap();

    // Verify SYN-ACK was sent
    let sent = dev.get_sent_packets();
    assert_eq!(sent.len(), 1, "Expected 1 packet (SYN-ACK)");

    let syn_ack = &sent[0].1;
    let (ip_hdr, tcp) = parse_tcp_packet(syn_ack);
    assert!(tcp.syn() && tcp.ack(), "Expected SYN+ACK flags");
    assert_eq!(tcp.acknowledgment_number(), 1001, "Expected ACK=1001");
    assert_eq!(tcp.data_offset(), 8, "MSS option makes an 8-word header");
    assert_eq!(tcp.options(), &MSS_OPTION[..]);
    assert_eq!(ip_hdr.destination_addr(), CLIENT.parse::<Ipv4Addr>().unwrap());

    let snap = stack.peek(h).unwrap();
    assert_eq!(snap.status, Status::SynSent);
    assert_eq!(snap.remote, Endpoint::new(CLIENT.parse().unwrap(), 12345));
    assert_eq!(snap.local, Endpoint::new(LOCAL.parse().unwrap(), 80));

    // Third leg completes the handshake without a reply
    let isn = tcp.sequence_number();
    let ack = PacketFactory::ack(CLIENT, LOCAL, 12345, 80, 1001, isn.wrapping_add(1));
    stack.handle_frame(&ack).unwrap();

    assert_eq!(dev.get_sent_packets().len(), 1, "ACK must not be answered");
    let snap = stack.peek(h).unwrap();
    assert_eq!(snap.status, Status::Established);
    assert_eq!(snap.seq, isn.wrapping_add(1));
    assert_eq!(snap.ack, 1001);
}

#[test]
fn test_syn_ack_checksum_verifies() {
    let (dev, _clock, mut stack) = setup();
    stack.listen(80).unwrap();
    stack
        .handle_frame(&PacketFactory::syn(CLIENT, LOCAL, 12345, 80, 1000))
        .unwrap();

    let pkt = dev.last_sent_packet().unwrap();
    let ip_hdr = Ipv4HeaderSlice::from_slice(&pkt).unwrap();
    let segment = &pkt[ip_hdr.slice().len()..];
    assert!(checksum::verify(
        ip_hdr.source_addr(),
        ip_hdr.destination_addr(),
        ip::PROTO_TCP,
        segment
    ));
}

#[test]
fn test_accept_invokes_handler() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let journal = recorder(&mut stack, h, false);

    establish_connection(&dev, &mut stack);

    assert_eq!(
        journal.borrow().accepted,
        vec![Endpoint::new(CLIENT.parse().unwrap(), 12345)]
    );
}

#[test]
fn test_echo_single_line() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let journal = recorder(&mut stack, h, true);

    // Establish connection first
    let isn = establish_connection(&dev, &mut stack);

    // Send data: "hello\n"
    let data = PacketFactory::data(
        CLIENT,
        LOCAL,
        12345,
        80,
        1001,
        isn.wrapping_add(1),
        b"hello\n",
    );
    stack.handle_frame(&data).unwrap();

    // One segment acknowledges the data and carries the reply
    let sent = dev.get_sent_packets();
    assert_eq!(sent.len(), 1);

    let (_, tcp) = parse_tcp_packet(&sent[0].1);
    assert!(tcp.psh() && tcp.ack(), "Expected PSH+ACK for echo");
    assert_eq!(tcp.acknowledgment_number(), 1007);
    assert_eq!(tcp.sequence_number(), isn.wrapping_add(1));
    assert_eq!(tcp_payload(&sent[0].1), b"hello\n");

    assert_eq!(journal.borrow().received, vec![b"hello\n".to_vec()]);
    let snap = stack.peek(h).unwrap();
    assert_eq!(snap.seq, isn.wrapping_add(1 + 6), "seq covers the reply");
}

#[test]
fn test_data_without_handler_is_queued() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let isn = establish_connection(&dev, &mut stack);

    let data = PacketFactory::data(CLIENT, LOCAL, 12345, 80, 1001, isn.wrapping_add(1), b"abc");
    stack.handle_frame(&data).unwrap();

    let sent = dev.get_sent_packets();
    assert_eq!(sent.len(), 1);
    let (_, tcp) = parse_tcp_packet(&sent[0].1);
    assert!(tcp.ack() && !tcp.psh(), "plain ACK expected");
    assert!(tcp_payload(&sent[0].1).is_empty());

    assert_eq!(stack.recv(h).unwrap(), Some(b"abc".to_vec()));
    assert_eq!(stack.recv(h).unwrap(), None);
}

#[test]
fn test_ack_is_monotonic() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let isn = establish_connection(&dev, &mut stack);
    let our = isn.wrapping_add(1);

    let mut acks = Vec::new();
    for (seq, data) in [
        (1001u32, &b"abc"[..]),
        (1001, &b"abc"[..]), // retransmission
        (900, &b"old"[..]),  // stale
        (1004, &b"de"[..]),
    ] {
        let pkt = PacketFactory::data(CLIENT, LOCAL, 12345, 80, seq, our, data);
        stack.handle_frame(&pkt).unwrap();
        acks.push(stack.peek(h).unwrap().ack);
    }

    assert_eq!(acks, vec![1004, 1004, 1004, 1006]);
    assert!(acks.windows(2).all(|w| crate::tcp::is_seq_lte(w[0], w[1])));

    // old bytes are acknowledged again but never delivered twice
    assert_eq!(dev.get_sent_packets().len(), 4, "every data segment is ACKed");
    assert_eq!(stack.recv(h).unwrap(), Some(b"abc".to_vec()));
    assert_eq!(stack.recv(h).unwrap(), Some(b"de".to_vec()));
    assert_eq!(stack.recv(h).unwrap(), None);
}

#[test]
fn test_overlapping_segment_delivers_new_bytes_only() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let journal = recorder(&mut stack, h, false);
    let isn = establish_connection(&dev, &mut stack);
    let our = isn.wrapping_add(1);

    for (seq, data) in [(1001u32, &b"abc"[..]), (1002, &b"bcdef"[..])] {
        let pkt = PacketFactory::data(CLIENT, LOCAL, 12345, 80, seq, our, data);
        stack.handle_frame(&pkt).unwrap();
    }

    assert_eq!(
        journal.borrow().received,
        vec![b"abc".to_vec(), b"def".to_vec()]
    );
    assert_eq!(stack.peek(h).unwrap().ack, 1007);
}

#[test]
fn test_sequence_numbers_wrap() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let peer_isn = u32::MAX - 1;

    stack
        .handle_frame(&PacketFactory::syn(CLIENT, LOCAL, 12345, 80, peer_isn))
        .unwrap();
    let reply = dev.last_sent_packet().unwrap();
    let (_, syn_ack) = parse_tcp_packet(&reply);
    assert_eq!(syn_ack.acknowledgment_number(), u32::MAX);
    let our = syn_ack.sequence_number().wrapping_add(1);
    stack
        .handle_frame(&PacketFactory::ack(CLIENT, LOCAL, 12345, 80, u32::MAX, our))
        .unwrap();
    assert_eq!(stack.peek(h).unwrap().status, Status::Established);

    let mut acks = Vec::new();
    for (seq, data) in [
        (u32::MAX, &b"abcd"[..]),
        (u32::MAX, &b"abcd"[..]), // retransmission across the wrap
        (3, &b"ef"[..]),
    ] {
        let pkt = PacketFactory::data(CLIENT, LOCAL, 12345, 80, seq, our, data);
        stack.handle_frame(&pkt).unwrap();
        acks.push(stack.peek(h).unwrap().ack);
    }

    assert_eq!(acks, vec![3, 3, 5]);
    assert_eq!(stack.recv(h).unwrap(), Some(b"abcd".to_vec()));
    assert_eq!(stack.recv(h).unwrap(), Some(b"ef".to_vec()));
    assert_eq!(stack.recv(h).unwrap(), None);
}

#[test]
fn test_repeated_syn_keeps_connection_open() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let syn = PacketFactory::syn(CLIENT, LOCAL, 12345, 80, 1000);

    // a SYN repeated before the handshake finishes gets the same SYN+ACK
    stack.handle_frame(&syn).unwrap();
    stack.handle_frame(&syn).unwrap();
    let sent = dev.get_sent_packets();
    assert_eq!(sent.len(), 2);
    let (_, first) = parse_tcp_packet(&sent[0].1);
    let (_, second) = parse_tcp_packet(&sent[1].1);
    assert!(second.syn() && second.ack());
    assert_eq!(second.sequence_number(), first.sequence_number());

    let isn = first.sequence_number();
    let ack = PacketFactory::ack(CLIENT, LOCAL, 12345, 80, 1001, isn.wrapping_add(1));
    stack.handle_frame(&ack).unwrap();
    dev.clear_sent();

    // once open, a stale SYN only draws an ACK
    stack.handle_frame(&syn).unwrap();
    let reply = dev.last_sent_packet().unwrap();
    let (_, tcp) = parse_tcp_packet(&reply);
    assert!(tcp.ack() && !tcp.syn());
    assert_eq!(tcp.acknowledgment_number(), 1001);
    let snap = stack.peek(h).unwrap();
    assert_eq!(snap.status, Status::Established);
    assert_eq!(snap.ack, 1001);

    let data = PacketFactory::data(CLIENT, LOCAL, 12345, 80, 1001, isn.wrapping_add(1), b"abc");
    stack.handle_frame(&data).unwrap();
    assert_eq!(stack.recv(h).unwrap(), Some(b"abc".to_vec()));
}

#[test]
fn test_syn_from_other_peer_while_busy_is_ignored() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    establish_connection(&dev, &mut stack);

    stack
        .handle_frame(&PacketFactory::syn(CLIENT, LOCAL, 23456, 80, 7000))
        .unwrap();

    assert!(dev.get_sent_packets().is_empty());
    let snap = stack.peek(h).unwrap();
    assert_eq!(snap.status, Status::Established);
    assert_eq!(snap.remote.port, 12345);
}

#[test]
fn test_tcp_inbox_is_bounded() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let isn = establish_connection(&dev, &mut stack);

    for i in 0..(INBOX_LIMIT as u32 + 1) {
        let byte = [b'a' + i as u8];
        let seq = 1001 + i;
        let pkt = PacketFactory::data(CLIENT, LOCAL, 12345, 80, seq, isn.wrapping_add(1), &byte);
        stack.handle_frame(&pkt).unwrap();
    }

    assert_eq!(stack.peek(h).unwrap().queued, INBOX_LIMIT);
    assert_eq!(stack.recv(h).unwrap(), Some(b"b".to_vec()), "oldest dropped");
}

#[test]
fn test_connection_teardown() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let journal = recorder(&mut stack, h, false);
    let isn = establish_connection(&dev, &mut stack);

    // Client sends FIN
    let fin = PacketFactory::fin(CLIENT, LOCAL, 12345, 80, 1001, isn.wrapping_add(1));
    stack.handle_frame(&fin).unwrap();

    // Server should answer with ACK+FIN
    let sent = dev.get_sent_packets();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].0.contains("-AF-"), "Expected FIN+ACK, got {}", sent[0].0);
    let (_, tcp) = parse_tcp_packet(&sent[0].1);
    assert_eq!(tcp.acknowledgment_number(), 1002, "FIN consumes one number");

    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);
    assert_eq!(journal.borrow().disconnected.len(), 1);
}

#[test]
fn test_duplicate_fin_is_idempotent() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let journal = recorder(&mut stack, h, false);
    let isn = establish_connection(&dev, &mut stack);

    let fin = PacketFactory::fin(CLIENT, LOCAL, 12345, 80, 1001, isn.wrapping_add(1));
    stack.handle_frame(&fin).unwrap();
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);
    stack.handle_frame(&fin).unwrap();
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);

    let sent = dev.get_sent_packets();
    assert_eq!(sent.len(), 2, "one ACK+FIN per FIN");
    assert!(sent.iter().all(|(desc, _)| desc.contains("-AF-")));
    assert_eq!(journal.borrow().disconnected.len(), 1, "callback runs once");
}

#[test]
fn test_rst_closes_without_reply() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    let journal = recorder(&mut stack, h, false);
    let isn = establish_connection(&dev, &mut stack);

    let rst = PacketFactory::rst(CLIENT, LOCAL, 12345, 80, 1001, isn.wrapping_add(1));
    stack.handle_frame(&rst).unwrap();

    assert!(dev.get_sent_packets().is_empty());
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);
    assert_eq!(journal.borrow().disconnected.len(), 1);
}

#[test]
fn test_truncated_segment_leaves_state_alone() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();
    establish_connection(&dev, &mut stack);
    let before = stack.peek(h).unwrap();

    let client: Ipv4Addr = CLIENT.parse().unwrap();
    let local: Ipv4Addr = LOCAL.parse().unwrap();
    let short = ip::build(client, local, 64, ip::PROTO_TCP, &[0u8; 12]).unwrap();

    let err = stack.handle_frame(&short).unwrap_err();
    assert!(matches!(err, Error::Truncated { .. }), "got {err}");
    assert_eq!(stack.peek(h).unwrap(), before);
    assert!(dev.get_sent_packets().is_empty());
}

#[test]
fn test_port_filter() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.listen(80).unwrap();

    let syn = PacketFactory::syn(CLIENT, LOCAL, 12345, 81, 1000);
    stack.handle_frame(&syn).unwrap();

    assert!(dev.get_sent_packets().is_empty());
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);
}

#[test]
fn test_port_listener_beats_wildcard() {
    let (dev, _clock, mut stack) = setup();
    let any = stack.listen(0).unwrap();
    let http = stack.listen(80).unwrap();

    stack
        .handle_frame(&PacketFactory::syn(CLIENT, LOCAL, 12345, 80, 1000))
        .unwrap();
    assert_eq!(stack.peek(http).unwrap().status, Status::SynSent);
    assert_eq!(stack.peek(any).unwrap().status, Status::Closed);

    stack
        .handle_frame(&PacketFactory::syn(CLIENT, LOCAL, 12346, 8080, 2000))
        .unwrap();
    let snap = stack.peek(any).unwrap();
    assert_eq!(snap.status, Status::SynSent);
    assert_eq!(snap.bind_port, 8080);
    assert_eq!(dev.get_sent_packets().len(), 2);
}

#[test]
fn test_listen_twice_is_address_in_use() {
    let (_dev, _clock, mut stack) = setup();
    stack.listen(80).unwrap();
    assert!(matches!(
        stack.listen(80),
        Err(Error::AddressInUse { port: 80, .. })
    ));
}

#[test]
fn test_connect_and_send() {
    let (dev, _clock, mut stack) = setup();
    scripted_server(&dev);

    let h = stack.open_tcp();
    stack.connect(h, server()).unwrap();

    let snap = stack.peek(h).unwrap();
    assert_eq!(snap.status, Status::Established);
    assert_eq!(snap.bind_port, 1024, "first ephemeral port");
    assert_eq!(snap.ack, 5001);

    let sent = dev.get_sent_packets();
    assert_eq!(sent.len(), 2, "SYN then ACK");
    let (_, syn) = parse_tcp_packet(&sent[0].1);
    assert!(syn.syn() && !syn.ack());
    assert_eq!(syn.options(), &MSS_OPTION[..]);
    let isn = syn.sequence_number();
    let (_, ack) = parse_tcp_packet(&sent[1].1);
    assert!(ack.ack() && !ack.syn());
    assert_eq!(ack.acknowledgment_number(), 5001);

    assert_eq!(stack.send(h, b"ping").unwrap(), 4);
    assert_eq!(stack.peek(h).unwrap().seq, isn.wrapping_add(1 + 4));
}

#[test]
fn test_connect_timeout() {
    let (dev, clock, mut stack) = setup();
    let start = clock.now();
    dev.set_drop_probability(1.0);

    let h = stack.open_tcp();
    let err = stack.connect(h, server()).unwrap_err();

    assert!(matches!(err, Error::Timeout(_)), "got {err}");
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);
    assert!(clock.now().duration_since(start) >= Duration::from_millis(3000));
}

#[test]
fn test_connect_device_error_closes() {
    let (dev, _clock, mut stack) = setup();
    dev.set_broken(true);

    let h = stack.open_tcp();
    let err = stack.connect(h, server()).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "got {err}");
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);

    // the socket is usable again once the device recovers
    dev.set_broken(false);
    scripted_server(&dev);
    stack.connect(h, server()).unwrap();
    assert_eq!(stack.peek(h).unwrap().status, Status::Established);
}

#[test]
fn test_send_device_error_closes() {
    let (dev, _clock, mut stack) = setup();
    scripted_server(&dev);
    let h = stack.open_tcp();
    stack.connect(h, server()).unwrap();

    dev.set_broken(true);
    let err = stack.send(h, b"ping").unwrap_err();

    assert!(matches!(err, Error::Io(_)), "got {err}");
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);
}

#[test]
fn test_connect_refused() {
    let (dev, _clock, mut stack) = setup();
    dev.set_peer(Box::new(|frame: &[u8]| {
        let (_, tcp) = parse_tcp_packet(frame);
        vec![PacketFactory::rst(
            SERVER,
            LOCAL,
            80,
            tcp.source_port(),
            0,
            tcp.sequence_number().wrapping_add(1),
        )]
    }));

    let h = stack.open_tcp();
    let err = stack.connect(h, server()).unwrap_err();
    assert!(matches!(err, Error::Refused(_)), "got {err}");
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);
}

#[test]
fn test_connect_rejects_unspecified_endpoint() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.open_tcp();

    let no_addr = Endpoint::new(Ipv4Addr::UNSPECIFIED, 80);
    let no_port = Endpoint::new(SERVER.parse().unwrap(), 0);
    assert!(matches!(stack.connect(h, no_addr), Err(Error::InvalidEndpoint(_))));
    assert!(matches!(stack.connect(h, no_port), Err(Error::InvalidEndpoint(_))));
    assert!(dev.get_sent_packets().is_empty());
}

#[test]
fn test_send_reconnects_after_close() {
    let (dev, _clock, mut stack) = setup();
    scripted_server(&dev);
    let h = stack.open_tcp();
    stack.connect(h, server()).unwrap();
    let bind = stack.peek(h).unwrap().bind_port;

    // server closes
    let seq = stack.peek(h).unwrap().seq;
    stack
        .handle_frame(&PacketFactory::fin(SERVER, LOCAL, 80, bind, 5001, seq))
        .unwrap();
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);

    dev.clear_sent();
    assert_eq!(stack.send(h, b"again").unwrap(), 5);
    assert_eq!(stack.peek(h).unwrap().status, Status::Established);

    let sent = dev.get_sent_packets();
    let (_, first) = parse_tcp_packet(&sent[0].1);
    assert!(first.syn(), "send reconnects first");
}

#[test]
fn test_send_rejects_oversized_payload() {
    let (dev, _clock, mut stack) = setup();
    scripted_server(&dev);
    let h = stack.open_tcp();
    stack.connect(h, server()).unwrap();

    let big = vec![0u8; 1461];
    assert!(matches!(stack.send(h, &big), Err(Error::TooLarge(1461))));
}

#[test]
fn test_send_timeout_closes() {
    let (dev, _clock, mut stack) = setup();
    scripted_server(&dev);
    let h = stack.open_tcp();
    stack.connect(h, server()).unwrap();

    dev.set_drop_probability(1.0);
    assert!(matches!(stack.send(h, b"lost"), Err(Error::Timeout(_))));
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);
}

#[test]
fn test_disconnect_sends_fin() {
    let (dev, _clock, mut stack) = setup();
    scripted_server(&dev);
    let h = stack.open_tcp();
    stack.connect(h, server()).unwrap();
    dev.clear_sent();

    stack.disconnect(h).unwrap();
    let fin = dev.last_sent_packet().unwrap();
    let (_, tcp) = parse_tcp_packet(&fin);
    assert!(tcp.fin() && tcp.ack() && tcp.psh());
    assert_eq!(stack.peek(h).unwrap().status, Status::Closed);

    stack.close(h).unwrap();
    assert!(matches!(stack.peek(h), Err(Error::NoSocket(_))));
}

#[test]
fn test_ephemeral_ports_are_distinct() {
    let (dev, _clock, mut stack) = setup();
    scripted_server(&dev);
    let a = stack.open_tcp();
    let b = stack.open_tcp();
    stack.connect(a, server()).unwrap();
    stack.connect(b, server()).unwrap();

    assert_eq!(stack.peek(a).unwrap().bind_port, 1024);
    assert_eq!(stack.peek(b).unwrap().bind_port, 1025);
}

#[test]
fn test_udp_receive_and_broadcast() {
    let (dev, _clock, mut stack) = setup();
    let h = stack.open_udp(5000).unwrap();

    let pkt = PacketFactory::udp(CLIENT, LOCAL, 6000, 5000, b"hi");
    stack.handle_frame(&pkt).unwrap();
    assert_eq!(
        stack.recv_from(h).unwrap(),
        Some((Endpoint::new(CLIENT.parse().unwrap(), 6000), b"hi".to_vec()))
    );

    stack
        .send_to(h, Endpoint::broadcast(3377), b"anyone?")
        .unwrap();
    let out = dev.last_sent_packet().unwrap();
    let (ip_hdr, udp) = parse_udp_packet(&out);
    assert_eq!(ip_hdr.destination_addr(), Ipv4Addr::BROADCAST);
    assert_eq!(udp.source_port(), 5000);
    assert_eq!(udp.destination_port(), 3377);
    assert_eq!(udp_payload(&out), b"anyone?");
    assert!(checksum::verify(
        ip_hdr.source_addr(),
        ip_hdr.destination_addr(),
        ip::PROTO_UDP,
        &out[ip_hdr.slice().len()..]
    ));
}

#[test]
fn test_udp_bad_checksum_dropped() {
    let (_dev, _clock, mut stack) = setup();
    let h = stack.open_udp(5000).unwrap();

    let mut pkt = PacketFactory::udp(CLIENT, LOCAL, 6000, 5000, b"hi");
    let last = pkt.len() - 1;
    pkt[last] ^= 0xff;
    stack.handle_frame(&pkt).unwrap();

    assert_eq!(stack.recv_from(h).unwrap(), None);
}

#[test]
fn test_udp_inbox_is_bounded() {
    let (_dev, _clock, mut stack) = setup();
    let h = stack.open_udp(5000).unwrap();

    for i in 0..=INBOX_LIMIT as u8 {
        let pkt = PacketFactory::udp(CLIENT, LOCAL, 6000, 5000, &[i]);
        stack.handle_frame(&pkt).unwrap();
    }

    let (_, first) = stack.recv_from(h).unwrap().unwrap();
    assert_eq!(first, vec![1]);
    let mut rest = 0;
    while stack.recv_from(h).unwrap().is_some() {
        rest += 1;
    }
    assert_eq!(rest, INBOX_LIMIT - 1);
}

#[test]
fn test_udp_port_in_use() {
    let (_dev, _clock, mut stack) = setup();
    stack.open_udp(5000).unwrap();
    assert!(matches!(
        stack.open_udp(5000),
        Err(Error::AddressInUse { port: 5000, .. })
    ));
}

#[test]
fn test_ethernet_medium() {
    let dev = MockDevice::new();
    let clock = Arc::new(MockClock::new(Instant::now()));
    let local = [0x02, 0, 0, 0, 0, 1];
    let peer = [0x02, 0, 0, 0, 0, 2];
    let config = StackConfig {
        medium: Medium::Ethernet { local, peer },
        ..StackConfig::default()
    };
    let mut stack = Stack::new(Box::new(dev.clone()), clock, config);
    let h = stack.listen(80).unwrap();

    let syn = PacketFactory::syn(CLIENT, LOCAL, 12345, 80, 1000);
    stack.handle_frame(&eth::wrap(peer, local, &syn)).unwrap();
    assert_eq!(stack.peek(h).unwrap().status, Status::SynSent);

    let frame = dev.last_sent_packet().unwrap();
    assert_eq!(&frame[..6], &peer, "destination MAC first");
    assert_eq!(&frame[6..12], &local);
    let reply = eth::strip(&frame).unwrap().unwrap();
    let tcp = TcpHeaderSlice::from_slice(&reply[20..]).unwrap();
    assert!(tcp.syn() && tcp.ack());
}

#[test]
fn test_poll_drains_device() {
    let (dev, _clock, mut stack) = setup();
    stack.listen(80).unwrap();
    dev.inject_packet(
        "Client SYN",
        PacketFactory::syn(CLIENT, LOCAL, 12345, 80, 1000),
    );
    dev.inject_packet("garbage", vec![0x45, 0, 0]);

    assert_eq!(stack.poll().unwrap(), 2);
    assert_eq!(dev.get_sent_packets().len(), 1);
}
