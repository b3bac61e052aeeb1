use fiber_dom::{
	create_root, deps, h, memory::HostNodeId, Context, Destructor, Element, EventPhase, Hooks, Listener, ManualLoop,
	MemoryHost, Node, Props, RenderError, Root, Scheduler,
};
use std::{cell::RefCell, rc::Rc};

thread_local! {
	static LOG: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

fn log(entry: impl Into<String>) {
	LOG.with(|log| log.borrow_mut().push(entry.into()));
}

fn take_log() -> Vec<String> {
	LOG.with(|log| core::mem::take(&mut *log.borrow_mut()))
}

fn setup() -> (Rc<ManualLoop>, Root<MemoryHost>, HostNodeId) {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let host_loop = ManualLoop::new();
	let scheduler = Scheduler::new(host_loop.clone());
	let mut host = MemoryHost::new();
	let container = host.create_container("main");
	(host_loop, create_root(host, container, scheduler), container)
}

fn html(root: &Root<MemoryHost>, container: HostNodeId) -> String {
	root.with_host(|host| host.inner_html(container))
}

fn counter(hooks: &mut Hooks<'_>, _: &Props) -> Node {
	let (count, set_count) = hooks.use_state(0);
	h("button")
		.on("onClick", Listener::infallible(move |_| set_count.dispatch(count + 1)))
		.child(count.to_string())
		.into()
}

#[test]
fn state_updates_rerender_synchronously() {
	let (host_loop, root, container) = setup();
	root.render(Element::function(counter));
	host_loop.flush();
	assert_eq!(html(&root, container), "<button>0</button>");

	let button = root.with_host(|host| host.find(container, "button")).unwrap();
	let events = root.dispatch_event("click", EventPhase::Bubble, &button, None).unwrap();
	assert_eq!(events.len(), 1);

	// Hook updates are sync and run in a microtask, before any scheduler task.
	assert_eq!(host_loop.pending_microtasks(), 1);
	host_loop.run_microtasks();
	assert_eq!(html(&root, container), "<button>1</button>");

	root.dispatch_event("click", EventPhase::Bubble, &button, None).unwrap();
	root.dispatch_event("click", EventPhase::Bubble, &button, None).unwrap();
	host_loop.flush();
	assert_eq!(html(&root, container), "<button>2</button>");
	assert_eq!(root.last_commit().unwrap().placements, 0);
}

fn leaf(name: &'static str) -> Element {
	Element::function(move |hooks: &mut Hooks<'_>, _: &Props| {
		hooks.use_layout_effect(
			move || {
				log(format!("layout mount {}", name));
				let destroy: Destructor = Box::new(move || log(format!("layout unmount {}", name)));
				Some(destroy)
			},
			deps![],
		);
		hooks.use_effect(
			move || {
				log(format!("passive mount {}", name));
				let destroy: Destructor = Box::new(move || log(format!("passive unmount {}", name)));
				Some(destroy)
			},
			deps![],
		);
		Node::Empty
	})
}

fn app(hooks: &mut Hooks<'_>, _: &Props) -> Node {
	hooks.use_layout_effect(
		|| {
			log("layout mount app");
			None
		},
		deps![],
	);
	hooks.use_effect(
		|| {
			log("passive mount app");
			None
		},
		deps![],
	);
	Node::from(vec![Node::from(leaf("a")), Node::from(leaf("b"))])
}

#[test]
fn effects_run_bottom_up_layout_first() {
	let (host_loop, root, _) = setup();
	root.render(Element::function(app));
	host_loop.flush();
	assert_eq!(
		take_log(),
		[
			"layout mount a",
			"layout mount b",
			"layout mount app",
			"passive mount a",
			"passive mount b",
			"passive mount app",
		]
	);

	// Empty dependency lists never rerun.
	root.render(Element::function(app));
	host_loop.flush();
	assert_eq!(take_log(), Vec::<String>::new());

	root.render(Node::Empty);
	host_loop.flush();
	assert_eq!(
		take_log(),
		["layout unmount a", "layout unmount b", "passive unmount a", "passive unmount b"]
	);
}

#[test]
fn passive_effects_can_be_flushed_early() {
	let (host_loop, root, _) = setup();
	let clock = host_loop.clone();
	root.render(Element::function(move |hooks: &mut Hooks<'_>, _: &Props| {
		let clock = clock.clone();
		hooks.use_layout_effect(
			move || {
				// Uses up the time slice, so the passive flush has to wait for the next one.
				clock.advance_clock(10);
				log("layout");
				None
			},
			deps![],
		);
		hooks.use_effect(
			|| {
				log("passive");
				None
			},
			deps![],
		);
		Node::Empty
	}));

	host_loop.run_macrotask();
	assert_eq!(take_log(), ["layout"]);

	assert!(root.flush_passive_effects());
	assert_eq!(take_log(), ["passive"]);
	assert!(!root.flush_passive_effects());

	host_loop.flush();
	assert_eq!(take_log(), Vec::<String>::new());
}

fn tracked(hooks: &mut Hooks<'_>, props: &Props) -> Node {
	let value = props.text("value").unwrap_or_default().to_owned();
	let logged = value.clone();
	hooks.use_effect(
		move || {
			log(format!("run {}", logged));
			let destroy: Destructor = Box::new(move || log(format!("clean {}", logged)));
			Some(destroy)
		},
		deps![value.clone()],
	);
	Node::from(value)
}

#[test]
fn effects_rerun_when_dependencies_change() {
	let (host_loop, root, container) = setup();
	root.render(Element::function(tracked).attr("value", "x"));
	host_loop.flush();
	root.render(Element::function(tracked).attr("value", "x"));
	host_loop.flush();
	root.render(Element::function(tracked).attr("value", "y"));
	host_loop.flush();
	assert_eq!(html(&root, container), "y");
	assert_eq!(take_log(), ["run x", "clean x", "run y"]);
}

fn flaky(hooks: &mut Hooks<'_>, props: &Props) -> Node {
	if props.bool("extra") == Some(true) {
		hooks.use_ref(0);
	}
	let (value, _) = hooks.use_state(1);
	Node::from(value)
}

#[test]
fn changing_hook_order_fails_the_render() {
	let (host_loop, root, container) = setup();
	root.render(h("div").child(Element::function(flaky)));
	host_loop.flush();
	assert_eq!(html(&root, container), "<div>1</div>");

	root.render(h("div").child(Element::function(flaky).attr("extra", true)));
	host_loop.flush();
	assert!(matches!(root.take_error(), Some(RenderError::HookOrderChanged { index: 0, .. })));
	assert!(root.take_error().is_none());

	// The committed tree is untouched and keeps working.
	assert_eq!(html(&root, container), "<div>1</div>");
	root.render(h("div").child(Element::function(flaky)));
	host_loop.flush();
	assert!(root.take_error().is_none());
	assert_eq!(html(&root, container), "<div>1</div>");
}

fn panicky(_: &mut Hooks<'_>, props: &Props) -> Node {
	if props.bool("explode") == Some(true) {
		panic!("boom");
	}
	Node::from("calm")
}

#[test]
fn panicking_component_fails_the_render() {
	let (host_loop, root, container) = setup();
	root.render(Element::function(panicky));
	host_loop.flush();

	root.render(Element::function(panicky).attr("explode", true));
	host_loop.flush();
	match root.take_error() {
		Some(RenderError::ComponentPanicked(message)) => assert_eq!(message, "boom"),
		other => panic!("Expected a panic error, got {:?}", other),
	}
	assert_eq!(html(&root, container), "calm");
}

#[test]
fn a_failed_render_does_not_touch_committed_dependencies() {
	let (host_loop, root, container) = setup();
	let tree = |value: &'static str, explode: bool| {
		h("div")
			.child(Element::function(tracked).attr("value", value))
			.child(Element::function(panicky).attr("explode", explode))
	};

	root.render(tree("x", false));
	host_loop.flush();
	assert_eq!(take_log(), ["run x"]);

	root.render(tree("y", true));
	host_loop.flush();
	assert!(matches!(root.take_error(), Some(RenderError::ComponentPanicked(_))));
	assert_eq!(html(&root, container), "<div>xcalm</div>");
	assert_eq!(take_log(), Vec::<String>::new());

	root.render(tree("y", false));
	host_loop.flush();
	assert!(root.take_error().is_none());
	assert_eq!(html(&root, container), "<div>ycalm</div>");
	assert_eq!(take_log(), ["clean x", "run y"]);
}

fn bad_effect(hooks: &mut Hooks<'_>, _: &Props) -> Node {
	hooks.use_effect(|| panic!("effect boom"), deps![]);
	Node::from("shown")
}

#[test]
fn a_panicking_effect_is_reported_and_the_root_keeps_working() {
	let (host_loop, root, container) = setup();
	let tree = |value: &'static str| {
		h("div")
			.child(Element::function(bad_effect))
			.child(Element::function(tracked).attr("value", value))
	};

	root.render(tree("x"));
	host_loop.flush();
	match root.take_error() {
		Some(RenderError::EffectPanicked(message)) => assert_eq!(message, "effect boom"),
		other => panic!("Expected an effect panic, got {:?}", other),
	}
	assert_eq!(html(&root, container), "<div>shownx</div>");
	assert_eq!(take_log(), ["run x"]);

	root.render(tree("y"));
	host_loop.flush();
	assert!(root.take_error().is_none());
	assert_eq!(html(&root, container), "<div>showny</div>");
	assert_eq!(take_log(), ["clean x", "run y"]);
}

thread_local! {
	static MEMO_RENDERS: RefCell<usize> = RefCell::new(0);
}

fn label(text: &'static str) -> Element {
	Element::memo(|_: &mut Hooks<'_>, props: &Props| {
		MEMO_RENDERS.with(|renders| *renders.borrow_mut() += 1);
		h("span").child(props.text("text").unwrap_or_default().to_owned()).into()
	})
	.attr("text", text)
}

#[test]
fn memo_skips_equal_props() {
	let (host_loop, root, container) = setup();
	let renders = || MEMO_RENDERS.with(|renders| *renders.borrow());

	root.render(label("a"));
	host_loop.flush();
	assert_eq!(renders(), 1);

	root.render(label("a"));
	host_loop.flush();
	assert_eq!(renders(), 1);
	assert_eq!(html(&root, container), "<span>a</span>");

	root.render(label("b"));
	host_loop.flush();
	assert_eq!(renders(), 2);
	assert_eq!(html(&root, container), "<span>b</span>");
}

fn inner_counter(hooks: &mut Hooks<'_>, _: &Props) -> Node {
	let (count, set_count) = hooks.use_state(0);
	h("i")
		.on("onClick", Listener::infallible(move |_| set_count.dispatch(count + 1)))
		.child(count.to_string())
		.into()
}

#[test]
fn state_updates_render_through_memo_bailouts() {
	let (host_loop, root, container) = setup();
	let wrapper = || Element::memo(|_: &mut Hooks<'_>, _: &Props| Element::function(inner_counter).into());
	root.render(wrapper());
	host_loop.flush();
	assert_eq!(html(&root, container), "<i>0</i>");

	let counter = root.with_host(|host| host.find(container, "i")).unwrap();
	root.dispatch_event("click", EventPhase::Bubble, &counter, None).unwrap();
	host_loop.flush();
	assert_eq!(html(&root, container), "<i>1</i>");
}

#[test]
fn nested_providers_shadow_and_restore() {
	let (host_loop, root, container) = setup();
	let theme = Context::new("default");
	let show = |theme: &Context<&'static str>| h("span").child(theme.consumer(|value| Node::from(*value)));

	root.render(
		h("div")
			.child(show(&theme))
			.child(
				theme
					.provider("V1")
					.child(show(&theme))
					.child(theme.provider("V2").child(show(&theme)))
					.child(show(&theme)),
			),
	);
	host_loop.flush();
	assert_eq!(
		html(&root, container),
		"<div><span>default</span><span>V1</span><span>V2</span><span>V1</span></div>"
	);
}

#[test]
fn use_context_reads_the_nearest_provider() {
	let (host_loop, root, container) = setup();
	let theme = Context::new(0_i32);
	let reader = {
		let theme = theme.clone();
		move |hooks: &mut Hooks<'_>, _: &Props| Node::from(*hooks.use_context(&theme))
	};

	root.render(theme.provider(7).child(Element::function(reader)));
	host_loop.flush();
	assert_eq!(html(&root, container), "7");
}

thread_local! {
	static THEMED_RENDERS: RefCell<usize> = RefCell::new(0);
}

fn themed_label(theme: &Context<&'static str>) -> Element {
	let theme = theme.clone();
	Element::memo(move |hooks: &mut Hooks<'_>, _: &Props| {
		THEMED_RENDERS.with(|renders| *renders.borrow_mut() += 1);
		h("em").child(*hooks.use_context(&theme)).into()
	})
}

#[test]
fn changed_provider_values_reach_consumers_below_a_memo() {
	let (host_loop, root, container) = setup();
	let renders = || THEMED_RENDERS.with(|renders| *renders.borrow());
	let theme = Context::new("default");
	let light = Rc::new("light");

	root.render(theme.provider_shared(light.clone()).child(themed_label(&theme)));
	host_loop.flush();
	assert_eq!(renders(), 1);
	assert_eq!(html(&root, container), "<em>light</em>");

	// Same value, same identity: the memo bails out.
	root.render(theme.provider_shared(light).child(themed_label(&theme)));
	host_loop.flush();
	assert_eq!(renders(), 1);

	root.render(theme.provider("dark").child(themed_label(&theme)));
	host_loop.flush();
	assert_eq!(renders(), 2);
	assert_eq!(html(&root, container), "<em>dark</em>");
}
