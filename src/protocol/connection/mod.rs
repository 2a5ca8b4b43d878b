mod init;

pub use init::Init;
pub use init::InitConfig;
pub use init::InitResult;
pub use init::Negotiated;
