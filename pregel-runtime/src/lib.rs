pub mod algorithms;
pub mod cluster;
pub mod conductor;
pub mod distributed;
pub mod graph;
pub mod http;
pub mod io;
pub mod job_mapping;
pub mod messaging;
pub mod observability;
pub mod shuffle;
pub mod worker;
