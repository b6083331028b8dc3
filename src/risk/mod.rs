// Exit bookkeeping after a quit decision
pub mod blacklist;

pub use blacklist::{Blacklist, ExitHandler};
