//! Core data models shared by every backend.
//!
//! `ObjectKey` names what lands in the bucket, `FilePayload` is what the caller
//! hands over, and the multipart types track one chunked upload from plan to
//! completion.

pub mod multipart;
pub mod object_key;
pub mod payload;
