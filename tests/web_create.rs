use fiber_dom::{h, Node};
use wasm_bindgen_test::{wasm_bindgen_test, wasm_bindgen_test_configure};

wasm_bindgen_test_configure!(run_in_browser);

mod web_setup_;
use web_setup_::{fixture, Fixture};

#[wasm_bindgen_test]
fn text() {
	let Fixture {
		host_loop,
		root,
		container,
	} = fixture();
	root.render("Hello fiber-dom!");
	host_loop.flush();
	assert_eq!(container.inner_html(), "Hello fiber-dom!");
}

#[wasm_bindgen_test]
fn element() {
	let Fixture {
		host_loop,
		root,
		container,
	} = fixture();
	root.render(
		h("p")
			.attr("className", "greeting")
			.attr("hidden", false)
			.attr("tabindex", 2)
			.child("Hello fiber-dom!"),
	);
	host_loop.flush();
	assert_eq!(container.inner_html(), r#"<p class="greeting" tabindex="2">Hello fiber-dom!</p>"#);
}

#[wasm_bindgen_test]
fn multi() {
	let Fixture {
		host_loop,
		root,
		container,
	} = fixture();
	root.render(vec![Node::from("a"), h("b").child("b").into(), Node::from(3)]);
	host_loop.flush();
	assert_eq!(container.inner_html(), "a<b>b</b>3");
}
