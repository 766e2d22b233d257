#[macro_use]
extern crate rocket;

pub mod api;
pub mod config;
pub mod cors;
pub mod engine;
pub mod hash;
pub mod kvstore;
pub mod models;
pub mod parameters;
pub mod processor;
pub mod signature;
pub mod storage;
