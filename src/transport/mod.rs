//! Transport layers exposing the deliberation engine

pub mod http;
