pub(crate) mod harness;

pub(crate) mod ledgers;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod services;
