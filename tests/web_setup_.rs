use fiber_dom::{create_root, dom::DomHost, ManualLoop, Root, Scheduler};
use std::{rc::Rc, sync::Once};
use wasm_bindgen::JsCast;
use web_sys::{window, HtmlBodyElement};

/// A root rendering into a fresh `<div>` in the page body, driven by a manual loop so tests can flush synchronously.
pub struct Fixture {
	pub host_loop: Rc<ManualLoop>,
	pub root: Root<DomHost>,
	pub container: web_sys::Element,
}

pub fn fixture() -> Fixture {
	static LOG_INITIALIZED: Once = Once::new();
	//TODO: Fail on Warning or Error.
	LOG_INITIALIZED.call_once(tracing_wasm::set_as_global_default);

	let document = window().unwrap().document().unwrap();
	let body = document.body().unwrap().dyn_into::<HtmlBodyElement>().unwrap();
	let container = document.create_element("div").unwrap();
	body.append_child(&container).unwrap();

	let host_loop = ManualLoop::new();
	let root = create_root(
		DomHost::new(document),
		container.clone().into(),
		Scheduler::new(host_loop.clone()),
	);
	Fixture {
		host_loop,
		root,
		container,
	}
}
