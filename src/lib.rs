pub mod network;
pub mod util;
pub mod test_util;
