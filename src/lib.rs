#![doc(html_root_url = "https://docs.rs/fiber-dom/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod config;
pub mod context;
pub mod dom;
pub mod element;
pub mod error;
pub mod events;
pub mod fiber;
pub mod hooks;
pub mod host;
pub mod lane;
pub mod memory;
pub mod root;
pub mod scheduler;

mod begin_work;
mod child_fiber;
mod commit_work;
mod complete_work;
mod work_loop;

pub use context::Context;
pub use element::{fragment, h, Element, Key, Node, PropValue, Props};
pub use error::{DispatchError, ListenerError, RenderError};
pub use events::{EventPhase, Listener, SyntheticEvent};
pub use hooks::{Dep, Destructor, Dispatch, Hooks};
pub use memory::MemoryHost;
pub use root::{create_root, Root, WeakRoot};
pub use scheduler::{ManualLoop, PriorityLevel, Scheduler};
pub use work_loop::CommitSummary;
