pub mod bridge;
pub mod callback;
pub mod completion;
pub mod engine;
pub mod error;
pub mod issuer;
pub mod natives;
pub mod node;
pub mod request;
pub mod store;
pub mod transport;

pub use bridge::{Bridge, TickReport};
pub use callback::{CallArg, CallContext, CallbackTable, PublicIndex, Script};
pub use completion::{CompletionQueue, CompletionRecord, CompletionSender, OperationId, Payload, PayloadKind};
pub use engine::RequestEngine;
pub use error::{BridgeError, Result};
pub use issuer::{Issuer, OperationState};
pub use node::Node;
pub use request::{HeaderSetId, Headers, RequestId, RequestOptions};
pub use store::{Handle, ValueStore};
pub use transport::{MockTransport, ReqwestTransport, Transport};
