pub mod domain_model;
pub mod domain_port;

pub mod infra_mysql;
pub mod infra_redis;

pub mod replica;
pub mod session;

pub mod group_chat;
pub mod scaling;

pub mod logger;
pub mod settings;

pub mod testutil;
