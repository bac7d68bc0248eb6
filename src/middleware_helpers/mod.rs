pub mod request_id;
pub mod session;

pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};
pub use session::{SessionId, SESSION_ID_HEADER};
