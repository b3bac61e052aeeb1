use crate::fiber::WorkTag;
use thiserror::Error;

/// Boxed error returned by event listeners.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Reasons a render pass is abandoned.
///
/// Each of these aborts only the work-in-progress tree; the committed tree stays as it was.
#[derive(Debug, Error)]
pub enum RenderError {
	#[error("Unknown unit of work: a {tag:?} node does not describe a {expected} element")]
	UnknownTag { tag: WorkTag, expected: &'static str },

	#[error("Expected to find a host parent above a {tag:?} node")]
	MissingHostParent { tag: WorkTag },

	#[error("Hook #{index} changed kind between renders (was {expected}, now {found})")]
	HookOrderChanged {
		index: usize,
		expected: &'static str,
		found: &'static str,
	},

	#[error("Rendered {found} hook(s), but the previous render used {expected}")]
	HookCountChanged { expected: usize, found: usize },

	#[error("Hook #{index} changed its value type between renders")]
	HookTypeChanged { index: usize },

	#[error("Component panicked during render: {0}")]
	ComponentPanicked(String),

	/// An effect or its cleanup panicked after the commit. The committed tree stays in place.
	#[error("Effect panicked: {0}")]
	EffectPanicked(String),
}

/// Failures surfaced by [`Root::dispatch_event`](`crate::root::Root::dispatch_event`).
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("Expected `{registration_name}` listener to be a function, instead got a {found} value")]
	InvalidListener {
		registration_name: String,
		found: &'static str,
	},

	/// The first listener failure of a dispatch. Later listeners still ran.
	#[error("Event listener failed: {0}")]
	Listener(#[source] ListenerError),

	#[error("The event target is not managed by this root")]
	UnknownTarget,

	/// The event fired synchronously from within a render or commit of the same root.
	#[error("The root is busy rendering")]
	Busy,
}
