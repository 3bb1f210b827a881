//! # Trellis: scope-aware dependency graphs for Rust
//!
//! Bindings are declared as typed data, grouped into modules, and installed
//! into a hierarchy of components. Each component's graph is validated once
//! (missing and duplicate bindings, cycles, scope ownership) and then
//! realized by component instances that cache scoped values at the level
//! that owns them.
//!
//! ```rust
//! use std::sync::Arc;
//! use trellis::prelude::*;
//!
//! struct Database;
//! struct Account(u32);
//! struct Limiter { account: Arc<Account> }
//!
//! let root_module = Module::builder("bank")
//!     .bind(Binding::constructor(Key::of::<Database>(), vec![], |_| Ok(Database))
//!         .in_scope(ScopeTag::new("Root")))
//!     .build();
//! let session_module = Module::builder("session")
//!     .bind(Binding::constructor(
//!         Key::of::<Limiter>(),
//!         vec![Key::of::<Account>().into()],
//!         |args| Ok(Limiter { account: args.instance::<Account>(0)? }),
//!     ).in_scope(ScopeTag::new("Session")))
//!     .build();
//!
//! let bank = ComponentSpec::root("Bank")
//!     .scope(ScopeTag::new("Root"))
//!     .install(root_module)
//!     .build();
//! let session = ComponentSpec::child("Session", &bank)
//!     .scope(ScopeTag::new("Session"))
//!     .install(session_module)
//!     .bound_instance(Key::of::<Account>())
//!     .entry_point(Key::of::<Limiter>())
//!     .entry_point(Key::of::<Database>())
//!     .build();
//!
//! let root = create_instance(&bank, build_graph(&bank)?, None, BoundInstances::new())?;
//! let session_graph = build_graph(&session)?;
//! let alice = root.create_child(&session, session_graph.clone(), BoundInstances::new().with(Account(1)))?;
//! let bob = root.create_child(&session, session_graph, BoundInstances::new().with(Account(2)))?;
//!
//! assert_eq!(alice.resolve::<Limiter>()?.account.0, 1);
//! assert!(!Arc::ptr_eq(&alice.resolve::<Limiter>()?, &bob.resolve::<Limiter>()?));
//! assert!(Arc::ptr_eq(&alice.resolve::<Database>()?, &bob.resolve::<Database>()?));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use trellis_container::*;
pub use trellis_support::*;
