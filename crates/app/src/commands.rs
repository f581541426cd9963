use std::error::Error;
use std::fmt;

use learn_core::expiry::{self, format_remaining};
use learn_core::model::{GrantStatus, Language, LessonId, SessionGrant};
use services::{
    AppServices, ChapterMode, Clock, DenyReason, GrantEvent, GrantObserver, LessonState,
    SelectionOutcome, Verdict,
};

use crate::args::Command;

/// Playback was refused; carries the student-facing message.
#[derive(Debug)]
pub struct Denied(pub &'static str);

impl fmt::Display for Denied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Error for Denied {}

/// Prints when a grant's window opens, so the end time is visible once.
pub struct WindowNotice;

impl GrantObserver for WindowNotice {
    fn on_event(&self, event: &GrantEvent) {
        if let GrantEvent::Activated(grant) = event {
            if let Some((_, end)) = grant.local_window() {
                eprintln!(
                    "session {} started, ends at {}",
                    grant.session_id(),
                    end.format("%H:%M:%S UTC")
                );
            }
        }
    }
}

pub async fn execute(
    services: &AppServices,
    clock: Clock,
    language: Language,
    command: Command,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Select { minutes, mood } => {
            select(services, minutes, mood.as_deref(), language).await
        }
        Command::Play { lesson } => play(services, clock, lesson, language).await,
        Command::Status => {
            status(services, clock, language).await;
            Ok(())
        }
        Command::Restore => {
            match services.restore().restore().await? {
                Some(grant) => println!("{}", describe(&grant, clock, language)),
                None => println!("{}", DenyReason::MissingGrant.message(language)),
            }
            Ok(())
        }
        Command::Dashboard => dashboard(services, language).await,
        Command::Signout => {
            services.store().clear().await?;
            println!("signed out");
            Ok(())
        }
    }
}

async fn select(
    services: &AppServices,
    minutes: i64,
    mood: Option<&str>,
    language: Language,
) -> Result<(), Box<dyn Error>> {
    match services.selection().select(minutes, mood, language).await? {
        SelectionOutcome::Created(grant) => println!(
            "session {} selected: {} minutes",
            grant.session_id(),
            grant.minutes_allowed()
        ),
        SelectionOutcome::Resume(grant) => println!(
            "session {} is still open, continuing it",
            grant.session_id()
        ),
    }
    Ok(())
}

async fn play(
    services: &AppServices,
    clock: Clock,
    lesson: LessonId,
    language: Language,
) -> Result<(), Box<dyn Error>> {
    let remaining = match services.gate().authorize().await {
        Verdict::Allow { remaining_secs } => remaining_secs,
        Verdict::Activated { grant } => expiry::remaining(&grant, clock.now()),
        Verdict::Deny(reason) => return Err(Denied(reason.message(language)).into()),
    };
    println!("lesson {lesson}: {} left", format_remaining(remaining));
    Ok(())
}

async fn status(services: &AppServices, clock: Clock, language: Language) {
    let Some(grant) = services.store().read().await else {
        println!("{}", DenyReason::MissingGrant.message(language));
        return;
    };
    println!("{}", describe(&grant, clock, language));
}

fn describe(grant: &SessionGrant, clock: Clock, language: Language) -> String {
    let id = grant.session_id();
    match grant.status() {
        GrantStatus::Pending => format!(
            "session {id}: {} minutes, not started",
            grant.minutes_allowed()
        ),
        GrantStatus::Active if !expiry::is_lapsed(grant, clock.now()) => format!(
            "session {id}: {} left",
            format_remaining(expiry::remaining(grant, clock.now()))
        ),
        _ => format!(
            "session {id}: {}",
            DenyReason::Expired.message(language)
        ),
    }
}

async fn dashboard(services: &AppServices, language: Language) -> Result<(), Box<dyn Error>> {
    let client = services.dashboard();
    let dashboard = client.dashboard(language).await?;

    if let Some(name) = dashboard.student.as_ref().and_then(|s| s.name.as_deref()) {
        println!("{name}");
    }
    for chapter in &dashboard.chapters {
        println!(
            "chapter {} {} [{}]",
            chapter.number,
            chapter.title.as_deref().unwrap_or(""),
            mode_label(chapter.mode)
        );
        for lesson in &chapter.lessons {
            println!(
                "  {:>4}  {} ({})",
                lesson.id,
                lesson.title.as_deref().unwrap_or(""),
                state_label(lesson.status)
            );
        }
    }

    let profile = client.profile().await?;
    println!(
        "lessons completed: {}, activities passed: {}, streak: {} days, progress: {}%",
        profile.stats.lessons_completed,
        profile.stats.activities_passed,
        profile.stats.streak_days,
        profile.progress_percent
    );
    Ok(())
}

fn mode_label(mode: ChapterMode) -> &'static str {
    match mode {
        ChapterMode::Focus => "focus",
        ChapterMode::Review => "review",
        ChapterMode::Locked => "locked",
        ChapterMode::Unknown => "-",
    }
}

fn state_label(state: LessonState) -> &'static str {
    match state {
        LessonState::Locked => "locked",
        LessonState::Unlocked => "open",
        LessonState::Completed => "done",
        LessonState::Unknown => "-",
    }
}
