pub mod chat;
pub mod index;
pub mod init;
pub mod project;
pub mod providers;
pub mod search;
