//! End-to-end scenarios: an ATM with a bank-wide database and one
//! subcomponent per logged-in session.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use trellis::prelude::*;
use trellis::graph::PlanKind;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Database {
    id: usize,
}

struct Account {
    username: String,
}

struct WithdrawalLimiter {
    account: Arc<Account>,
    remaining: u64,
}

struct Commands;

fn root_scope() -> ScopeTag {
    ScopeTag::new("Root")
}

fn session_scope() -> ScopeTag {
    ScopeTag::new("Session")
}

struct Atm {
    spec: Arc<ComponentSpec>,
    session: Arc<ComponentSpec>,
    databases_opened: Arc<AtomicUsize>,
}

fn atm() -> Atm {
    let databases_opened = Arc::new(AtomicUsize::new(0));

    let bank_module = Module::builder("bank")
        .bind(
            Binding::constructor(Key::of::<Database>(), vec![], {
                let opened = Arc::clone(&databases_opened);
                move |_| Ok(Database { id: opened.fetch_add(1, Ordering::SeqCst) })
            })
            .in_scope(root_scope()),
        )
        .bind(Binding::map_entry(Key::of::<Commands>(), "login", vec![], |_| Ok("login")))
        .subcomponent("Session")
        .build();

    let session_module = Module::builder("session")
        .bind(
            Binding::constructor(
                Key::of::<WithdrawalLimiter>(),
                vec![Key::of::<Account>().into()],
                |args| {
                    Ok(WithdrawalLimiter { account: args.instance::<Account>(0)?, remaining: 1_000 })
                },
            )
            .in_scope(session_scope()),
        )
        .bind(Binding::map_entry(Key::of::<Commands>(), "deposit", vec![], |_| Ok("deposit")))
        .build();

    let spec = ComponentSpec::root("Atm")
        .scope(root_scope())
        .install(bank_module)
        .entry_point(Key::of::<Database>())
        .entry_point(Key::of::<Commands>())
        .build();
    let session = ComponentSpec::child("Session", &spec)
        .scope(session_scope())
        .install(session_module)
        .bound_instance(Key::of::<Account>())
        .entry_point(Key::of::<WithdrawalLimiter>())
        .entry_point(Key::of::<Database>())
        .entry_point(Key::of::<Commands>())
        .build();

    Atm { spec, session, databases_opened }
}

fn account(username: &str) -> BoundInstances {
    BoundInstances::new().with(Account { username: username.to_string() })
}

#[test]
fn sessions_share_the_database_but_not_limiters() {
    init_tracing();
    let atm = atm();
    let root = create_instance(&atm.spec, build_graph(&atm.spec).unwrap(), None, BoundInstances::new()).unwrap();
    let session_graph = build_graph(&atm.session).unwrap();

    let alice = create_child(&root, &atm.session, Arc::clone(&session_graph), account("alice")).unwrap();
    let bob = create_child(&root, &atm.session, session_graph, account("bob")).unwrap();

    let alice_limiter = alice.resolve::<WithdrawalLimiter>().unwrap();
    let bob_limiter = bob.resolve::<WithdrawalLimiter>().unwrap();
    assert!(!Arc::ptr_eq(&alice_limiter, &bob_limiter));
    assert_eq!(alice_limiter.account.username, "alice");
    assert_eq!(bob_limiter.account.username, "bob");
    assert_eq!(alice_limiter.remaining, 1_000);
    assert!(Arc::ptr_eq(&alice_limiter, &alice.resolve::<WithdrawalLimiter>().unwrap()));

    let alice_db = alice.resolve::<Database>().unwrap();
    let bob_db = bob.resolve::<Database>().unwrap();
    let root_db = root.resolve::<Database>().unwrap();
    assert!(Arc::ptr_eq(&alice_db, &bob_db));
    assert!(Arc::ptr_eq(&alice_db, &root_db));
    assert_eq!(root_db.id, 0);
    assert_eq!(atm.databases_opened.load(Ordering::SeqCst), 1);
}

#[test]
fn session_commands_include_bank_commands() {
    init_tracing();
    let atm = atm();
    let root = create_instance(&atm.spec, build_graph(&atm.spec).unwrap(), None, BoundInstances::new()).unwrap();
    let session = root
        .create_child(&atm.session, build_graph(&atm.session).unwrap(), account("alice"))
        .unwrap();

    let at_root = root.get_map(&Key::of::<Commands>()).unwrap();
    let in_session = session.get_map(&Key::of::<Commands>()).unwrap();

    assert_eq!(at_root.keys().collect::<Vec<_>>(), vec!["login"]);
    assert_eq!(in_session.keys().collect::<Vec<_>>(), vec!["login", "deposit"]);
    assert_eq!(*in_session.get_as::<&str>("deposit").unwrap(), "deposit");
}

#[test]
fn session_cannot_redefine_a_bank_command() {
    let atm = atm();
    let shadowing = Module::builder("shadowing")
        .bind(Binding::map_entry(Key::of::<Commands>(), "login", vec![], |_| Ok("sso-login")))
        .build();
    let session = ComponentSpec::child("Session", &atm.spec)
        .install(shadowing)
        .entry_point(Key::of::<Commands>())
        .build();

    let batch = build_graph(&session).unwrap_err();
    assert_eq!(batch.len(), 1);
    match &batch.diagnostics[0] {
        Diagnostic::DuplicateMapKey(err) => {
            assert_eq!(err.discriminator, "login");
            assert_eq!(err.modules, vec!["bank", "shadowing"]);
        }
        other => panic!("Expected DuplicateMapKey, got: {other:?}"),
    }
}

#[test]
fn subcomponent_factory_opens_sessions() {
    let atm = atm();
    let root = create_instance(&atm.spec, build_graph(&atm.spec).unwrap(), None, BoundInstances::new()).unwrap();
    let session_graph = build_graph(&atm.session).unwrap();

    let factory = root
        .get_as::<SubcomponentFactory>(&SubcomponentFactory::key("Session"))
        .unwrap();
    let session = factory.create(&session_graph, account("carol")).unwrap();

    assert_eq!(session.resolve::<Account>().unwrap().username, "carol");
    assert!(Arc::ptr_eq(&session.resolve::<Database>().unwrap(), &root.resolve::<Database>().unwrap()));
}

#[test]
fn cycle_is_rejected_until_one_edge_is_lazy() {
    struct Teller;
    struct Ledger;

    let build = |ledger_dependency: Dependency| {
        let module = Module::builder("cycle")
            .bind(Binding::constructor(Key::of::<Teller>(), vec![Key::of::<Ledger>().into()], |_| Ok(Teller)))
            .bind(Binding::constructor(Key::of::<Ledger>(), vec![ledger_dependency], |_| Ok(Ledger)))
            .build();
        let spec = ComponentSpec::root("Atm").install(module).entry_point(Key::of::<Teller>()).build();
        build_graph(&spec)
    };

    let batch = build(Dependency::instance(Key::of::<Teller>())).unwrap_err();
    match &batch.diagnostics[0] {
        Diagnostic::CyclicDependency(err) => {
            assert_eq!(err.path, vec![Key::of::<Teller>(), Key::of::<Ledger>()]);
            assert!(batch.to_string().contains("Teller → Ledger → Teller"));
        }
        other => panic!("Expected CyclicDependency, got: {other:?}"),
    }

    assert!(build(Dependency::lazy(Key::of::<Teller>())).is_ok());
}

#[test]
fn optional_account_is_present_only_in_sessions() {
    let key = Key::of::<Option<Arc<Account>>>();
    let module = Module::builder("greeting").bind(Binding::optional_of::<Account>()).build();
    let spec = ComponentSpec::root("Atm").install(module).entry_point(key.clone()).build();
    let session = ComponentSpec::child("Session", &spec)
        .bound_instance(Key::of::<Account>())
        .entry_point(key.clone())
        .build();

    let root_graph = build_graph(&spec).unwrap();
    let session_graph = build_graph(&session).unwrap();
    assert!(matches!(root_graph.plan(&key).unwrap().kind(), PlanKind::Optional { present: false, .. }));
    assert!(matches!(session_graph.plan(&key).unwrap().kind(), PlanKind::Optional { present: true, .. }));

    let root = create_instance(&spec, root_graph, None, BoundInstances::new()).unwrap();
    let session = root.create_child(&session, session_graph, account("dave")).unwrap();
    assert!(root.get_optional::<Account>(&key).unwrap().is_none());
    assert_eq!(session.get_optional::<Account>(&key).unwrap().unwrap().username, "dave");
}

#[test]
fn broken_graph_reports_every_problem_at_once() {
    struct Printer;
    struct Receipt;

    let module = Module::builder("broken")
        .bind(Binding::constructor(Key::of::<Receipt>(), vec![Key::of::<Printer>().into()], |_| Ok(Receipt)))
        .bind(Binding::constructor(Key::of::<Database>(), vec![], |_| Ok(Database { id: 0 })))
        .bind(Binding::constructor(Key::of::<Database>(), vec![], |_| Ok(Database { id: 1 })))
        .build();
    let spec = ComponentSpec::root("Atm")
        .install(module)
        .entry_point(Key::of::<Receipt>())
        .entry_point(Key::of::<Database>())
        .build();

    let batch = build_graph(&spec).unwrap_err();
    let mut categories: Vec<&str> = batch.iter().map(Diagnostic::category).collect();
    categories.sort();
    assert_eq!(categories, vec!["DuplicateBinding", "MissingBinding"]);

    let rendered = batch.to_string();
    assert!(rendered.starts_with("Component `Atm` has 2 binding graph error(s)"));
}

#[test]
fn concurrent_sessions_open_one_database() {
    use std::sync::Barrier;
    use std::thread;

    init_tracing();
    let atm = atm();
    let root = create_instance(&atm.spec, build_graph(&atm.spec).unwrap(), None, BoundInstances::new()).unwrap();
    let session_graph = build_graph(&atm.session).unwrap();
    let barrier = Barrier::new(6);

    let databases: Vec<Arc<Database>> = thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let root = root.clone();
                let session_graph = Arc::clone(&session_graph);
                let session_spec = &atm.session;
                let barrier = &barrier;
                s.spawn(move || {
                    let session = root
                        .create_child(session_spec, session_graph, account(&format!("user-{i}")))
                        .unwrap();
                    barrier.wait();
                    session.resolve::<Database>().unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(atm.databases_opened.load(Ordering::SeqCst), 1);
    assert!(databases.iter().all(|db| Arc::ptr_eq(db, &databases[0])));
}
