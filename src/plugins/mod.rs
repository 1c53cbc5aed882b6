//! Runtime subsystems: the watcher supervisor and the config integrity
//! guardian with its checks, incident store and alert/pause dispatcher.

pub mod alert;
pub mod baseline;
pub mod guardian;
pub mod incident;
pub mod policy;
pub mod supervisor;
