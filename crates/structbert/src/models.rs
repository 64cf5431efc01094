//! These models represent the objects passed around during an exchange
//!
//! There are several different related formats we need to interact with:
//! - chat requests from the interface, carrying the full conversation
//! - the framed data stream sent back to the interface
//! - gemini and openai request/response formats, sent to and from the backend
//!
//! We always immediately convert those formats into the internal structs here, so the
//! coordinator and tool registry only ever see one representation.
pub mod conversation;
pub mod event;
pub mod message;
pub mod role;
pub mod tool;
