pub mod driver;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod pattern;
pub mod relation;
pub mod schema;
pub mod util;
pub mod validation;

pub use driver::{Driver, DriverContext, DriverContract};
pub use drivers::{EnvDriver, JsonDriver, SqliteDriver};
pub use engine::{Kfg, MountOptions, Scope};
pub use error::{FieldError, KfgError, Result};
pub use hooks::{HookEvent, HookRegistry};
pub use relation::{EntitySource, JsonFileSource, SourceRegistry};
pub use schema::{FieldDefinition, FieldKind, IdStrategy, Relation, SchemaNode};
