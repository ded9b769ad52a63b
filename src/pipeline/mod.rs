//! Response-delivery pipeline: chunking, playback, and the turn loop.

pub mod chunker;
pub mod coordinator;
pub mod messages;
pub mod playback;
