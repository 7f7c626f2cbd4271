mod badges;
mod health;
mod jobs;
mod projects;
mod webhook;

pub use badges::*;
pub use health::*;
pub use jobs::*;
pub use projects::*;
pub use webhook::*;
