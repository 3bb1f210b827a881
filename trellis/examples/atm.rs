//! ATM wiring with Trellis: one bank-wide database, one session per login.

use std::sync::Arc;

use tracing::info;
use trellis::prelude::*;

// === Domain types ===

struct Database {
    url: String,
}

struct Account {
    username: String,
    balance: u64,
}

struct WithdrawalLimiter {
    remaining: u64,
}

struct Teller {
    db: Arc<Database>,
    account: Arc<Account>,
    limiter: Arc<WithdrawalLimiter>,
}

impl Teller {
    fn describe(&self) -> String {
        format!(
            "{} has {} (may withdraw {} today) via {}",
            self.account.username, self.account.balance, self.limiter.remaining, self.db.url,
        )
    }
}

struct Commands;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("trellis_container=debug")
        .init();

    let root_scope = ScopeTag::new("Root");
    let session_scope = ScopeTag::new("Session");

    // Database and the login command live for the whole ATM
    let bank = Module::builder("bank")
        .bind(
            Binding::constructor(Key::of::<Database>(), vec![], |_| {
                Ok(Database { url: "postgres://localhost/atm".into() })
            })
            .in_scope(root_scope.clone()),
        )
        .bind(Binding::map_entry(Key::of::<Commands>(), "login", vec![], |_| Ok("login <user>")))
        .subcomponent("Session")
        .build();

    // Everything tied to one logged-in account
    let session = Module::builder("session")
        .bind(
            Binding::constructor(Key::of::<WithdrawalLimiter>(), vec![], |_| {
                Ok(WithdrawalLimiter { remaining: 1_000 })
            })
            .in_scope(session_scope.clone()),
        )
        .bind(Binding::constructor(
            Key::of::<Teller>(),
            vec![
                Key::of::<Database>().into(),
                Key::of::<Account>().into(),
                Key::of::<WithdrawalLimiter>().into(),
            ],
            |args| {
                Ok(Teller {
                    db: args.instance(0)?,
                    account: args.instance(1)?,
                    limiter: args.instance(2)?,
                })
            },
        ))
        .bind(Binding::map_entry(Key::of::<Commands>(), "deposit", vec![], |_| Ok("deposit <amount>")))
        .bind(Binding::map_entry(Key::of::<Commands>(), "withdraw", vec![], |_| Ok("withdraw <amount>")))
        .build();

    let atm_spec = ComponentSpec::root("Atm").scope(root_scope).install(bank).build();
    let session_spec = ComponentSpec::child("Session", &atm_spec)
        .scope(session_scope)
        .install(session)
        .bound_instance(Key::of::<Account>())
        .entry_point(Key::of::<Teller>())
        .entry_point(Key::of::<Commands>())
        .build();

    // Validate both graphs up front
    let atm = create_instance(&atm_spec, build_graph(&atm_spec)?, None, BoundInstances::new())?;
    let session_graph = build_graph(&session_spec)?;

    let open_session = atm.get_as::<SubcomponentFactory>(&SubcomponentFactory::key("Session"))?;
    for (username, balance) in [("alice", 250), ("bob", 40)] {
        let session = open_session.create(
            &session_graph,
            BoundInstances::new().with(Account { username: username.into(), balance }),
        )?;

        let teller = session.resolve::<Teller>()?;
        info!("{}", teller.describe());

        let commands = session.get_map(&Key::of::<Commands>())?;
        for (name, usage) in commands.iter() {
            if let Ok(usage) = Arc::clone(usage).downcast::<&str>() {
                println!("  {name:<10} {usage}");
            }
        }
    }

    Ok(())
}
