mod policy;
mod prompt;
mod ready;
mod run;

pub use policy::Policy;
pub use prompt::Prompt;
pub use ready::Ready;
pub use run::Run;
