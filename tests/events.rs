use fiber_dom::{
	create_root, h, memory::HostNodeId, DispatchError, EventPhase, Listener, ManualLoop, MemoryHost, Root, Scheduler,
};
use std::{cell::RefCell, rc::Rc};

thread_local! {
	static LOG: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

fn take_log() -> Vec<String> {
	LOG.with(|log| core::mem::take(&mut *log.borrow_mut()))
}

fn logging(name: &'static str) -> Listener {
	Listener::infallible(move |_| LOG.with(|log| log.borrow_mut().push(name.to_owned())))
}

fn setup() -> (Rc<ManualLoop>, Root<MemoryHost>, HostNodeId) {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let host_loop = ManualLoop::new();
	let scheduler = Scheduler::new(host_loop.clone());
	let mut host = MemoryHost::new();
	let container = host.create_container("main");
	(host_loop, create_root(host, container, scheduler), container)
}

fn find(root: &Root<MemoryHost>, container: HostNodeId, tag: &str) -> HostNodeId {
	root.with_host(|host| host.find(container, tag)).unwrap()
}

#[test]
fn capture_runs_root_first_and_bubble_target_first() {
	let (host_loop, root, container) = setup();
	root.render(
		h("div")
			.on("onClickCapture", logging("div capture"))
			.on("onClick", logging("div bubble"))
			.child(
				h("button")
					.on("onClickCapture", logging("button capture"))
					.on("onClick", logging("button bubble"))
					.child("go"),
			),
	);
	host_loop.flush();
	let button = find(&root, container, "button");

	root.dispatch_event("click", EventPhase::Capture, &button, None).unwrap();
	root.dispatch_event("click", EventPhase::Bubble, &button, None).unwrap();
	assert_eq!(take_log(), ["div capture", "button capture", "button bubble", "div bubble"]);
}

#[test]
fn text_inside_a_node_targets_that_node() {
	let (host_loop, root, container) = setup();
	root.render(h("button").on("onClick", logging("button")).child("label"));
	host_loop.flush();
	let button = find(&root, container, "button");
	let text = root.with_host(|host| host.children(button)[0]);

	let events = root.dispatch_event("click", EventPhase::Bubble, &text, None).unwrap();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].registration_name(), "onClick");
	assert_eq!(events[0].event_type(), "click");
	assert_eq!(take_log(), ["button"]);
}

#[test]
fn stop_propagation_skips_outer_listeners() {
	let (host_loop, root, container) = setup();
	root.render(
		h("div").on("onClick", logging("div")).child(
			h("button")
				.on(
					"onClick",
					Listener::infallible(|event| {
						LOG.with(|log| log.borrow_mut().push("button".to_owned()));
						event.stop_propagation();
					}),
				)
				.child("go"),
		),
	);
	host_loop.flush();
	let button = find(&root, container, "button");

	let events = root.dispatch_event("click", EventPhase::Bubble, &button, None).unwrap();
	assert!(events[0].is_propagation_stopped());
	assert_eq!(take_log(), ["button"]);
}

#[test]
fn disabled_buttons_ignore_mouse_listeners() {
	let (host_loop, root, container) = setup();
	root.render(
		h("div")
			.on("onClick", logging("div"))
			.child(h("button").attr("disabled", true).on("onClick", logging("button")).child("go")),
	);
	host_loop.flush();
	let button = find(&root, container, "button");

	root.dispatch_event("click", EventPhase::Bubble, &button, None).unwrap();
	assert_eq!(take_log(), ["div"]);
}

#[test]
fn listener_failures_are_reported_after_all_listeners_ran() {
	let (host_loop, root, container) = setup();
	root.render(
		h("div")
			.on("onClick", logging("div"))
			.child(h("button").on("onClick", Listener::new(|_| Err("nope".into()))).child("go")),
	);
	host_loop.flush();
	let button = find(&root, container, "button");

	let result = root.dispatch_event("click", EventPhase::Bubble, &button, None);
	assert!(matches!(result, Err(DispatchError::Listener(_))));
	assert_eq!(take_log(), ["div"]);
}

#[test]
fn a_panicking_listener_is_reported_like_a_failure() {
	let (host_loop, root, container) = setup();
	root.render(
		h("div")
			.on("onClick", logging("outer"))
			.child(h("button").on("onClick", Listener::infallible(|_| panic!("boom"))).child("go")),
	);
	host_loop.flush();
	let button = find(&root, container, "button");

	match root.dispatch_event("click", EventPhase::Bubble, &button, None) {
		Err(DispatchError::Listener(error)) => assert!(error.to_string().contains("boom"), "{}", error),
		other => panic!("Expected a listener failure, got {:?}", other.map(|events| events.len())),
	}
	assert_eq!(take_log(), ["outer"]);

	// The click's priority must not leak into updates made outside the dispatch.
	root.render(h("p").child("later"));
	assert_eq!(host_loop.pending_microtasks(), 0);
	assert_eq!(root.scheduler().pending_tasks(), 1);
	host_loop.flush();
	assert_eq!(root.with_host(|host| host.inner_html(container)), "<p>later</p>");
}

#[test]
fn non_function_listeners_are_rejected() {
	let (host_loop, root, container) = setup();
	root.render(h("button").attr("onClick", "alert(1)").child("go"));
	host_loop.flush();
	let button = find(&root, container, "button");

	let result = root.dispatch_event("click", EventPhase::Bubble, &button, None);
	match result {
		Err(DispatchError::InvalidListener { registration_name, .. }) => assert_eq!(registration_name, "onClick"),
		other => panic!("Expected an invalid listener error, got {:?}", other.map(|events| events.len())),
	}
}

#[test]
fn foreign_targets_are_rejected() {
	let (host_loop, root, _) = setup();
	root.render(h("div"));
	host_loop.flush();
	let stray = root.with_host_mut(|host| host.create_container("stray"));

	let result = root.dispatch_event("click", EventPhase::Bubble, &stray, None);
	assert!(matches!(result, Err(DispatchError::UnknownTarget)));
}

#[test]
fn change_fires_only_when_the_value_changed() {
	let (host_loop, root, container) = setup();
	root.render(h("input").attr("value", "a").on(
		"onChange",
		Listener::infallible(|event| LOG.with(|log| log.borrow_mut().push(event.event_type().to_owned()))),
	));
	host_loop.flush();
	let input = find(&root, container, "input");

	root.with_host_mut(|host| host.set_input_value(input, "b"));
	let events = root.dispatch_event("input", EventPhase::Bubble, &input, None).unwrap();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].registration_name(), "onChange");
	assert_eq!(take_log(), ["change"]);

	root.with_host_mut(|host| host.set_input_value(input, "a"));
	let events = root.dispatch_event("input", EventPhase::Bubble, &input, None).unwrap();
	assert!(events.is_empty());
	assert_eq!(take_log(), Vec::<String>::new());
}

#[test]
fn discrete_events_render_in_a_microtask() {
	let (host_loop, root, container) = setup();
	let weak = root.downgrade();
	root.render(h("button").child("before").on(
		"onClick",
		Listener::infallible(move |_| {
			if let Some(root) = weak.upgrade() {
				root.render(h("p").child("after"));
			}
		}),
	));
	host_loop.flush();
	let button = find(&root, container, "button");

	root.dispatch_event("click", EventPhase::Bubble, &button, None).unwrap();
	assert_eq!(host_loop.pending_microtasks(), 1);
	assert_eq!(host_loop.pending_macrotasks(), 0);
	host_loop.run_microtasks();
	assert_eq!(root.with_host(|host| host.inner_html(container)), "<p>after</p>");
}

#[test]
fn continuous_events_render_in_a_task() {
	let (host_loop, root, container) = setup();
	let weak = root.downgrade();
	root.render(h("div").child("idle").on(
		"onMouseMove",
		Listener::infallible(move |_| {
			if let Some(root) = weak.upgrade() {
				root.render(h("div").child("moved"));
			}
		}),
	));
	host_loop.flush();
	let div = find(&root, container, "div");

	root.dispatch_event("mousemove", EventPhase::Bubble, &div, None).unwrap();
	assert_eq!(host_loop.pending_microtasks(), 0);
	assert_eq!(root.scheduler().pending_tasks(), 1);
	host_loop.flush();
	assert_eq!(root.with_host(|host| host.inner_html(container)), "<div>moved</div>");
}

#[test]
fn discrete_update_takes_over_a_pending_default_render() {
	let (host_loop, root, container) = setup();
	let weak = root.downgrade();
	root.render(h("button").child("0").on(
		"onClick",
		Listener::infallible(move |_| {
			if let Some(root) = weak.upgrade() {
				root.render(h("b").child("clicked"));
			}
		}),
	));
	host_loop.flush();
	let button = find(&root, container, "button");

	// A default priority render is waiting for its task when the click arrives.
	root.render(h("i").child("queued"));
	assert_eq!(root.scheduler().pending_tasks(), 1);
	root.dispatch_event("click", EventPhase::Bubble, &button, None).unwrap();
	assert_eq!(root.scheduler().pending_tasks(), 0);

	host_loop.run_microtasks();
	assert_eq!(root.with_host(|host| host.inner_html(container)), "<b>clicked</b>");
	host_loop.flush();
	assert_eq!(root.with_host(|host| host.inner_html(container)), "<b>clicked</b>");
}

#[test]
fn native_events_reach_listeners() {
	let (host_loop, root, container) = setup();
	root.render(h("div").child("x").on(
		"onKeyDown",
		Listener::infallible(|event| {
			let key = event.native::<String>().cloned().unwrap_or_default();
			LOG.with(|log| log.borrow_mut().push(key));
		}),
	));
	host_loop.flush();
	let div = find(&root, container, "div");

	let native: Rc<dyn core::any::Any> = Rc::new("Enter".to_owned());
	root.dispatch_event("keydown", EventPhase::Bubble, &div, Some(native)).unwrap();
	assert_eq!(take_log(), ["Enter"]);
}
