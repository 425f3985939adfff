//! crates/edulab_core/src/presentation.rs
//!
//! Turns a profile, its recent enrollments and the unread count into the
//! dashboard view model. Styling is emitted as opaque tokens (icon names and
//! gradient classes) for the front-end to render.

use crate::domain::{Profile, RecentExperiment};
use crate::progression::Progression;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

/// How many recent experiments the dashboard shows by default.
pub const DEFAULT_RECENT_LIMIT: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsView {
    pub streak: u32,
    pub xp: u32,
    /// XP with thousands separators, e.g. `2,450`.
    pub xp_display: String,
    pub level_label: String,
    pub badge_label: &'static str,
    pub badge_label_vi: &'static str,
    pub progression: Progression,
}

impl StatsView {
    pub fn from_profile(profile: &Profile) -> Self {
        let progression = Progression::from_xp(profile.xp);
        if profile.level != progression.level {
            debug!(
                "Stale level cache for {}: stored {}, computed {}.",
                profile.id, profile.level, progression.level
            );
        }
        Self {
            streak: profile.streak,
            xp: profile.xp,
            xp_display: group_thousands(profile.xp),
            level_label: format!("Lv.{}", progression.level),
            badge_label: progression.badge.label(),
            badge_label_vi: progression.badge.label_vi(),
            progression,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentCard {
    pub enrollment_id: Uuid,
    pub experiment_id: Uuid,
    pub title: String,
    pub subject: String,
    pub icon: String,
    pub gradient: &'static str,
    pub background: &'static str,
    pub progress: u8,
    pub completed: bool,
    pub progress_label: String,
    pub action_label: &'static str,
    pub last_accessed_at: DateTime<Utc>,
    pub last_access_label: String,
}

impl ExperimentCard {
    pub fn from_recent(recent: &RecentExperiment, now: DateTime<Utc>) -> Self {
        let enrollment = &recent.enrollment;
        let experiment = &recent.experiment;

        // A completed enrollment always renders as a full bar.
        let mut progress = enrollment.progress.min(100);
        if enrollment.completed && progress != 100 {
            warn!(
                "Enrollment {} is completed with progress {}.",
                enrollment.id, enrollment.progress
            );
            progress = 100;
        }
        let completed = progress == 100;

        let style = SubjectStyle::for_subject(&experiment.subject);
        let icon = experiment
            .icon
            .clone()
            .filter(|icon| !icon.trim().is_empty())
            .unwrap_or_else(|| style.icon.to_string());

        Self {
            enrollment_id: enrollment.id,
            experiment_id: experiment.id,
            title: experiment.title.clone(),
            subject: experiment.subject.clone(),
            icon,
            gradient: style.gradient,
            background: style.background,
            progress,
            completed,
            progress_label: if completed {
                "Hoàn thành ✓".to_string()
            } else {
                format!("{}%", progress)
            },
            action_label: if completed { "Xem lại" } else { "Tiếp tục" },
            last_accessed_at: enrollment.last_accessed_at,
            last_access_label: relative_time_vi(enrollment.last_accessed_at, now),
        }
    }
}

/// Icon and colours for a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectStyle {
    pub icon: &'static str,
    pub gradient: &'static str,
    pub background: &'static str,
}

impl SubjectStyle {
    const PHYSICS: Self = Self {
        icon: "atom",
        gradient: "from-violet-500 to-purple-600",
        background: "bg-violet-50 dark:bg-violet-950/30",
    };
    const CHEMISTRY: Self = Self {
        icon: "beaker",
        gradient: "from-blue-500 to-cyan-500",
        background: "bg-blue-50 dark:bg-blue-950/30",
    };
    const BIOLOGY: Self = Self {
        icon: "dna",
        gradient: "from-emerald-500 to-green-600",
        background: "bg-emerald-50 dark:bg-emerald-950/30",
    };
    const OTHER: Self = Self {
        icon: "flask-conical",
        gradient: "from-orange-500 to-red-500",
        background: "bg-orange-50 dark:bg-orange-950/30",
    };

    pub fn for_subject(subject: &str) -> Self {
        match subject.trim().to_lowercase().as_str() {
            "vật lý" | "vật lí" | "physics" => Self::PHYSICS,
            "hóa học" | "hoá học" | "chemistry" => Self::CHEMISTRY,
            "sinh học" | "biology" => Self::BIOLOGY,
            _ => Self::OTHER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickAction {
    pub label: &'static str,
    pub icon: &'static str,
    pub primary: bool,
}

pub const QUICK_ACTIONS: [QuickAction; 3] = [
    QuickAction {
        label: "Bắt đầu thí nghiệm mới",
        icon: "flask-conical",
        primary: true,
    },
    QuickAction {
        label: "Vào phòng thực hành ngay",
        icon: "test-tubes",
        primary: false,
    },
    QuickAction {
        label: "Xem bài học mới",
        icon: "microscope",
        primary: false,
    },
];

/// The whole dashboard, ready to serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub first_name: String,
    pub initials: String,
    pub greeting: String,
    pub stats: StatsView,
    pub recent_experiments: Vec<ExperimentCard>,
    pub unread_notifications: u64,
    pub quick_actions: Vec<QuickAction>,
}

/// The mutable dashboard held for one viewer.
///
/// Pushed profile rows replace the profile and recompute the stats; enrollment
/// and notification changes replace their slice after a re-fetch.
#[derive(Debug, Clone)]
pub struct DashboardState {
    profile: Profile,
    stats: StatsView,
    recent: Vec<RecentExperiment>,
    unread: u64,
}

impl DashboardState {
    pub fn new(profile: Profile, recent: Vec<RecentExperiment>, unread: u64) -> Self {
        let stats = StatsView::from_profile(&profile);
        Self {
            profile,
            stats,
            recent,
            unread,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn stats(&self) -> &StatsView {
        &self.stats
    }

    pub fn unread(&self) -> u64 {
        self.unread
    }

    pub fn apply_profile(&mut self, profile: Profile) -> &StatsView {
        self.stats = StatsView::from_profile(&profile);
        self.profile = profile;
        &self.stats
    }

    pub fn set_recent(&mut self, recent: Vec<RecentExperiment>) {
        self.recent = recent;
    }

    pub fn set_unread(&mut self, unread: u64) {
        self.unread = unread;
    }

    pub fn cards(&self, now: DateTime<Utc>) -> Vec<ExperimentCard> {
        let mut recent: Vec<&RecentExperiment> = self.recent.iter().collect();
        recent.sort_by(|a, b| {
            b.enrollment
                .last_accessed_at
                .cmp(&a.enrollment.last_accessed_at)
        });
        recent
            .into_iter()
            .map(|r| ExperimentCard::from_recent(r, now))
            .collect()
    }

    pub fn view(&self, now: DateTime<Utc>) -> DashboardView {
        let first_name = first_name(&self.profile.name);
        DashboardView {
            user_id: self.profile.id,
            name: self.profile.name.clone(),
            email: self.profile.email.clone(),
            greeting: format!("Chào mừng trở lại, {}! 👋", first_name),
            initials: initials(&self.profile.name),
            first_name,
            stats: self.stats.clone(),
            recent_experiments: self.cards(now),
            unread_notifications: self.unread,
            quick_actions: QUICK_ACTIONS.to_vec(),
        }
    }
}

/// Vietnamese names put the given name last.
pub fn first_name(full_name: &str) -> String {
    full_name
        .split_whitespace()
        .last()
        .unwrap_or(full_name)
        .to_string()
}

/// First letter of each word, keeping the last two, upper-cased.
pub fn initials(full_name: &str) -> String {
    let letters: Vec<char> = full_name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .collect();
    let start = letters.len().saturating_sub(2);
    letters[start..]
        .iter()
        .flat_map(|c| c.to_uppercase())
        .collect()
}

/// Buckets the time since `then` into minutes, hours or days.
pub fn relative_time_vi(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return "Vừa xong".to_string();
    }
    if minutes < 60 {
        return format!("{} phút trước", minutes);
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return format!("{} giờ trước", hours);
    }
    match elapsed.num_days() {
        1 => "Hôm qua".to_string(),
        days => format!("{} ngày trước", days),
    }
}

fn group_thousands(value: u32) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
