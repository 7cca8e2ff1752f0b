// duet-common: wire protocol and seed types shared by the relay and its clients

pub mod protocol;
pub mod seed;
