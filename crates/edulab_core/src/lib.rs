pub mod domain;
pub mod ports;
pub mod presentation;
pub mod progression;
pub mod shell;

pub use domain::{
    ChangeEvent, ChangeKind, DashboardChange, Experiment, NewProfile, Notification, Profile,
    RecentExperiment, Resource, Role, RowFilter, SessionContext, SessionIdentity, UserExperiment,
};
pub use ports::{
    ChangeFeedService, ChangeStream, DatabaseService, IdentityProvider, PortError, PortResult,
};
pub use presentation::{DashboardState, DashboardView, ExperimentCard, StatsView};
pub use progression::{Badge, Progression, XP_PER_LEVEL};
pub use shell::{SessionShell, ShellOutcome, SubscriptionHandle};
