use fiber_dom::{
	config::{SchedulerConfig, MAX_SIGNED_31_BIT_INT},
	scheduler::{Callback, ManualLoop, PriorityLevel, Scheduler},
};
use std::{
	cell::RefCell,
	panic::{catch_unwind, AssertUnwindSafe},
	rc::Rc,
};

fn setup() -> (Rc<ManualLoop>, Rc<Scheduler>, Rc<RefCell<Vec<&'static str>>>) {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let host_loop = ManualLoop::new();
	let scheduler = Scheduler::new(host_loop.clone());
	(host_loop, scheduler, Rc::default())
}

fn record(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Callback {
	let log = log.clone();
	Callback::once(move || log.borrow_mut().push(name))
}

#[test]
fn idle_work_is_not_starved() {
	let (host_loop, scheduler, log) = setup();
	let start = scheduler.now();
	let idle = Rc::new(scheduler.schedule_callback(PriorityLevel::Idle, record(&log, "idle")));
	assert_eq!(idle.expiration_time() - start, MAX_SIGNED_31_BIT_INT);

	for name in ["first", "second", "third"] {
		let (log, idle) = (log.clone(), idle.clone());
		scheduler.schedule_callback(
			PriorityLevel::Immediate,
			Callback::once(move || {
				assert!(idle.is_pending());
				log.borrow_mut().push(name);
			}),
		);
	}

	host_loop.flush();
	assert_eq!(*log.borrow(), ["first", "second", "third", "idle"]);
	assert!(!idle.is_pending());
	assert_eq!(scheduler.pending_tasks(), 0);
}

#[test]
fn a_panicking_task_does_not_wedge_the_scheduler() {
	let (host_loop, scheduler, log) = setup();
	scheduler.schedule_callback(PriorityLevel::Normal, Callback::once(|| panic!("boom")));
	scheduler.schedule_callback(PriorityLevel::Normal, record(&log, "after the panic"));

	let flushed = catch_unwind(AssertUnwindSafe(|| host_loop.flush()));
	assert!(flushed.is_err());
	assert_eq!(scheduler.current_priority_level(), PriorityLevel::Normal);

	host_loop.flush();
	assert_eq!(*log.borrow(), ["after the panic"]);

	scheduler.schedule_callback(PriorityLevel::Low, record(&log, "scheduled later"));
	host_loop.flush();
	assert_eq!(*log.borrow(), ["after the panic", "scheduled later"]);
	assert_eq!(scheduler.pending_tasks(), 0);
}

#[test]
fn only_the_earliest_timer_is_armed() {
	let (host_loop, scheduler, log) = setup();
	scheduler.schedule_callback_with_delay(PriorityLevel::Normal, 50, record(&log, "late"));
	scheduler.schedule_callback_with_delay(PriorityLevel::Normal, 10, record(&log, "early"));
	assert_eq!(host_loop.armed_timeouts(), 1);
	assert_eq!(host_loop.next_timeout_due(), Some(10));

	host_loop.advance(10);
	assert_eq!(*log.borrow(), ["early"]);
	assert_eq!(host_loop.armed_timeouts(), 1);
	assert_eq!(host_loop.next_timeout_due(), Some(50));

	host_loop.advance(40);
	assert_eq!(*log.borrow(), ["early", "late"]);
	assert_eq!(host_loop.armed_timeouts(), 0);
}

#[test]
fn cancelling_a_delayed_task_leaves_its_timer_harmless() {
	let (host_loop, scheduler, log) = setup();
	let handle = scheduler.schedule_callback_with_delay(PriorityLevel::Normal, 20, record(&log, "cancelled"));
	scheduler.cancel_callback(&handle);
	assert!(!handle.is_pending());

	host_loop.run_until_idle();
	assert!(log.borrow().is_empty());
	assert_eq!(scheduler.pending_tasks(), 0);
}

#[test]
fn long_tasks_yield_between_each_other() {
	let host_loop = ManualLoop::new();
	let scheduler = Scheduler::with_config(host_loop.clone(), SchedulerConfig::default().with_frame_interval(5));
	let log: Rc<RefCell<Vec<&'static str>>> = Rc::default();

	for name in ["a", "b"] {
		let (host_loop, log) = (host_loop.clone(), log.clone());
		scheduler.schedule_callback(
			PriorityLevel::Normal,
			Callback::once(move || {
				host_loop.advance_clock(8);
				log.borrow_mut().push(name);
			}),
		);
	}

	assert!(host_loop.run_macrotask());
	assert_eq!(*log.borrow(), ["a"]);
	assert!(host_loop.run_macrotask());
	assert_eq!(*log.borrow(), ["a", "b"]);
}

#[test]
fn continuations_run_until_done() {
	let (host_loop, scheduler, log) = setup();
	let remaining = Rc::new(RefCell::new(3));

	fn step(remaining: Rc<RefCell<u32>>, log: Rc<RefCell<Vec<&'static str>>>) -> Callback {
		Callback::new(move |_| {
			log.borrow_mut().push("step");
			*remaining.borrow_mut() -= 1;
			if *remaining.borrow() > 0 {
				Some(step(remaining, log))
			} else {
				None
			}
		})
	}

	scheduler.schedule_callback(PriorityLevel::UserBlocking, step(remaining, log.clone()));
	host_loop.flush();
	assert_eq!(*log.borrow(), ["step", "step", "step"]);
}
