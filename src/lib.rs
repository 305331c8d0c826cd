pub mod archive;
pub mod cleanup;
pub mod download;
pub mod http;
pub mod install;
pub mod ledger;
pub mod manifest;
pub mod package;
pub mod runtime;
