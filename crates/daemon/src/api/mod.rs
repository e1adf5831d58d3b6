/// Hidden-service protocol server
///
/// The small unauthenticated HTTP protocol peers speak to each other over
/// onion addresses:
/// - `GET /` liveness and version
/// - `GET /wcdyu` capability negotiation
/// - `GET /crypto` public-key retrieval
/// - `POST /addme` contact requests
/// - `POST /send` message delivery

pub mod cors;
pub mod handlers;
pub mod responses;
pub mod server;

pub use handlers::{decode_message, AppError, AppState};
pub use server::{router, HiddenServiceServer};
pub use responses::*;
