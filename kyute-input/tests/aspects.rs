use kyute_input::{
    control_builder, Applied, AppliedAny, AppliedKind, Aspect, AspectConversion, Control, ControlBuilder, ControlId,
    Conversion,
};
use once_cell::sync::Lazy;
use rand::prelude::SliceRandom;
use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn length() -> Conversion<String, usize> {
    Conversion::map(|s: &String| s.len(), |n: &usize| "*".repeat(*n))
}

fn widen() -> Conversion<usize, u64> {
    Conversion::map(|n: &usize| *n as u64, |n: &u64| *n as usize)
}

static SHARED: Lazy<Aspect<Rc<str>>> = Lazy::new(|| Aspect::new("shared", |_, _| Applied::known(Rc::from("shared"))));

type Log = Rc<RefCell<Vec<&'static str>>>;

fn attempt(aspect: &Aspect<&'static str>, log: &Log, name: &'static str, claim: bool) -> AspectConversion {
    let log = log.clone();
    AspectConversion::of(aspect, move |_| {
        log.borrow_mut().push(name);
        claim.then(|| Applied::known(name))
    })
}

#[test]
fn aspects_are_applied_once() {
    init_logging();
    let applications = Arc::new(AtomicUsize::new(0));
    let aspects: Vec<Aspect<Rc<usize>>> = (0..8)
        .map(|i| {
            let applications = applications.clone();
            Aspect::new("numbered", move |control, aspect| {
                applications.fetch_add(1, Ordering::SeqCst);
                Applied::built(aspect, control, move |_, _| Rc::new(i))
            })
        })
        .collect();

    let control = Control::new(0u32);
    let mut first: Vec<Option<Rc<usize>>> = vec![None; aspects.len()];
    let mut order: Vec<usize> = (0..aspects.len()).collect();
    let mut rng = rand::thread_rng();
    for _ in 0..3 {
        order.shuffle(&mut rng);
        for &i in order.iter() {
            let instance = control.aspect(&aspects[i]).unwrap();
            assert_eq!(*instance, i);
            let first = first[i].get_or_insert_with(|| instance.clone());
            assert!(Rc::ptr_eq(first, &instance));
        }
    }
    assert_eq!(applications.load(Ordering::SeqCst), aspects.len());
}

#[test]
fn conversion_leaves_source_untouched() {
    init_logging();
    let origin: Aspect<(ControlId, Option<ControlId>)> = Aspect::new("origin", |control, aspect| {
        Applied::built(aspect, control, |control, origin| {
            (control.id(), origin.map(|origin| origin.id()))
        })
    });

    let source = Control::new(String::from("abc"));
    let before = source.aspect(&origin);
    assert_eq!(before, Some((source.id(), None)));

    let converted = source.convert(length());
    assert_eq!(converted.aspect(&origin), Some((converted.id(), Some(source.id()))));
    assert_eq!(source.aspect(&origin), before);
    assert_eq!(source.applied(&origin).kind(), AppliedKind::Built);

    // converted first
    let other = Control::new(String::from("xyz"));
    let other_converted = other.convert(length());
    assert_eq!(
        other_converted.aspect(&origin),
        Some((other_converted.id(), Some(other.id())))
    );
    assert_eq!(other.aspect(&origin), Some((other.id(), None)));
}

#[test]
fn known_instances_are_shared_along_conversions() {
    init_logging();
    let shared = &*SHARED;

    let c = Control::new(String::from("abc"));
    let c2 = c.convert(length());
    let c3 = c2.convert(widen());
    // resolve from the end of the chain
    let i3 = c3.aspect(shared).unwrap();
    let i2 = c2.aspect(shared).unwrap();
    let i1 = c.aspect(shared).unwrap();
    assert!(Rc::ptr_eq(&i1, &i2));
    assert!(Rc::ptr_eq(&i1, &i3));
    assert_eq!(c3.applied(shared).kind(), AppliedKind::Known);
}

#[test]
fn empty_aspects_stay_empty() {
    init_logging();
    // only string controls are left without an instance
    let numeric: Aspect<u32> = Aspect::new("numeric", |control, _| {
        if control.downcast::<String>().is_ok() {
            Applied::empty()
        } else {
            Applied::known(1)
        }
    });

    let c = Control::new(String::from("abc"));
    let c2 = c.convert(length());
    let c3 = c2.convert(widen());
    assert!(c.applied(&numeric).is_empty());
    assert_eq!(c2.aspect(&numeric), None);
    assert_eq!(c3.aspect(&numeric), None);
    assert_eq!(c3.applied(&numeric).kind(), AppliedKind::Empty);

    // applied directly, the definition has an instance
    assert_eq!(Control::new(3usize).aspect(&numeric), Some(1));
}

#[test]
fn inconvertible_aspects_fall_back_to_default() {
    init_logging();
    let label: Aspect<&'static str> = Aspect::new("label", |control, aspect| {
        Applied::inconvertible(aspect, control, "own", Some("default"))
    });

    let c = Control::new(String::from("abc"));
    let c2 = c.convert(length());
    assert_eq!(c.aspect(&label), Some("own"));
    assert_eq!(c2.aspect(&label), Some("default"));
    assert_eq!(c2.applied(&label).kind(), AppliedKind::Inconvertible);
}

#[test]
fn first_override_wins() {
    init_logging();
    let d: Aspect<&'static str> = Aspect::new("d", |_, _| Applied::known("default"));
    let log: Log = Default::default();

    let both = Control::with_aspects(
        0u32,
        AspectConversion::combine([attempt(&d, &log, "A", true), attempt(&d, &log, "B", true)]),
    );
    assert_eq!(both.aspect(&d), Some("A"));
    assert_eq!(*log.borrow(), vec!["A"]);

    log.borrow_mut().clear();
    let second = Control::with_aspects(
        0u32,
        AspectConversion::combine([attempt(&d, &log, "A", false), attempt(&d, &log, "B", true)]),
    );
    assert_eq!(second.aspect(&d), Some("B"));
    assert_eq!(*log.borrow(), vec!["A", "B"]);

    assert!(AspectConversion::combine(Vec::new()).is_none());
}

#[test]
fn empty_override_is_not_a_pass() {
    init_logging();
    let d: Aspect<&'static str> = Aspect::new("d", |_, _| Applied::known("default"));
    let control = Control::with_aspects(
        0u32,
        AspectConversion::new(|_, _| Some(AppliedAny::new(Applied::<&'static str>::empty()))),
    );
    assert_eq!(control.aspect(&d), None);
}

#[test]
fn builder_tries_overrides_in_order() {
    init_logging();
    let d: Aspect<&'static str> = Aspect::new("d", |_, _| Applied::known("from source"));
    let log: Log = Default::default();
    let source = Control::new(String::from("abc"));

    let mut builder =
        ControlBuilder::new(|aspects: AspectConversion| source.convert(length().with_aspects(aspects)));
    builder
        .add_aspect(&d, attempt(&d, &log, "X", false))
        .add_aspect(&d, attempt(&d, &log, "Y", false))
        .add_aspects(attempt(&d, &log, "Z", false));
    let converted = builder.build();
    assert_eq!(converted.aspect(&d), Some("from source"));
    assert_eq!(*log.borrow(), vec!["X", "Y", "Z"]);
    assert_eq!(converted.it(), 3);

    log.borrow_mut().clear();
    let mut builder = control_builder(0u32);
    builder
        .add_aspect(&d, attempt(&d, &log, "X", false))
        .add_aspect(&d, attempt(&d, &log, "Y", true))
        .add_aspects(attempt(&d, &log, "Z", true));
    assert_eq!(builder.build().aspect(&d), Some("Y"));
    assert_eq!(*log.borrow(), vec!["X", "Y"]);
}

#[test]
fn setup_waits_for_first_resolution() {
    init_logging();
    let d: Aspect<Rc<u32>> = Aspect::new("d", |control, aspect| Applied::built(aspect, control, |_, _| Rc::new(42)));
    let received: Rc<RefCell<Option<Rc<u32>>>> = Default::default();

    let mut builder = control_builder(String::from("abc"));
    let received2 = received.clone();
    builder.setup_aspect(&d, move |instance, _| *received2.borrow_mut() = instance.cloned());
    let control = builder.build();
    assert!(received.borrow().is_none());

    let instance = control.aspect(&d).unwrap();
    let received = received.borrow_mut().take().unwrap();
    assert!(Rc::ptr_eq(&received, &instance));
}

#[test]
fn known_instance_reads_source_value() {
    init_logging();
    // reads the tracker, not the control, so the control does not own itself through its aspects
    let current: Aspect<Rc<dyn Fn() -> String>> = Aspect::new("current", |control, _| {
        let value = control.downcast::<String>().unwrap().value().clone();
        let read: Rc<dyn Fn() -> String> = Rc::new(move || value.get());
        Applied::known(read)
    });

    let source = Control::new(String::from("old"));
    assert_eq!((source.aspect(&current).unwrap())(), "old");

    let converted = source.convert(length());
    assert_eq!(converted.it(), 3);
    let read = converted.aspect(&current).unwrap();
    assert_eq!(read(), "old");

    source.set(String::from("other"));
    assert_eq!(read(), "other");
    assert_eq!(converted.it(), 5);
}
