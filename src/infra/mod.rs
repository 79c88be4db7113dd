pub mod http_client;
pub mod sqlite_loader;

pub use http_client::ReqwestHttp;
pub use sqlite_loader::SqliteLoader;
