#![allow(clippy::result_large_err)]

pub mod asserter;
pub mod auth;
pub mod executor;
pub mod materializer;
pub mod model;
pub mod parser;
pub mod runner;
pub mod script;
pub mod store;
pub mod substitution;
pub mod validator;
