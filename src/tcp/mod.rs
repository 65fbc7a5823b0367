mod flags;
mod seq;
mod socket;

pub use self::seq::{advance, is_seq_lt, is_seq_lte};
pub use self::socket::{Snapshot, SocketHandler, Status, TcpSocket, WaitToken};

pub use self::flags::flags_to_string;
pub use self::flags::{ACK, FIN, PSH, RST, SYN, URG};
