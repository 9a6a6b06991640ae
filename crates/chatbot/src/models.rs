//! These models represent the objects passed around by the chat orchestration
//!
//! There are several different related formats we need to interact with:
//! - chat turns posted by the web client, in the ui message format (parts + attachments)
//! - data stream protocol events, sent from the server to the client
//! - openai compatible messages/tools, sent from the agent to the LLM
//! - stored message records, read back to rebuild a conversation
//!
//! We always immediately convert those data models into the internal structs using
//! to/from helpers, so the internal models are not an exact match to any of these formats.
pub mod message;
pub mod role;
pub mod session;
pub mod tool;
