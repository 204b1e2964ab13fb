// 消息系統模組
// 透過發布/訂閱傳輸層與工作進程（代理、遊戲伺服器）交換具型別封包與自由格式消息

pub mod broker;
pub mod error;
pub mod packets;
pub mod protocol;
pub mod registry;
pub mod transport;

// 重新導出常用類型
pub use broker::{Broker, WILDCARD};
pub use error::{ProtocolError, TransportError};
pub use packets::{PacketBody, ServerActionKind};
pub use protocol::{Envelope, Message, Packet};
pub use registry::{PacketDecoder, PacketRegistry};
pub use transport::{MemoryTransport, Transport, TransportMessage};
