use learn_core::model::{ChapterId, Language, LessonId};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::ApiConfig;
use crate::error::DashboardError;

/// How a chapter is presented to the student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterMode {
    Focus,
    Review,
    Locked,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonState {
    Locked,
    Unlocked,
    Completed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LessonSummary {
    pub id: LessonId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sort_order: u32,
    #[serde(default)]
    pub status: LessonState,
}

impl LessonSummary {
    /// Whether the dashboard lets the student open this lesson.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.status, LessonState::Unlocked | LessonState::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mode: ChapterMode,
    #[serde(default)]
    pub lessons: Vec<LessonSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StudentSummary {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub speech_level: Option<String>,
}

/// Chapter and lesson listing for the student home screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Dashboard {
    #[serde(default)]
    pub student: Option<StudentSummary>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl Dashboard {
    /// Locate a lesson and the chapter containing it.
    #[must_use]
    pub fn find_lesson(&self, lesson_id: LessonId) -> Option<(&Chapter, &LessonSummary)> {
        self.chapters.iter().find_map(|chapter| {
            chapter
                .lessons
                .iter()
                .find(|lesson| lesson.id == lesson_id)
                .map(|lesson| (chapter, lesson))
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStats {
    #[serde(default)]
    pub lessons_completed: u32,
    #[serde(default)]
    pub activities_passed: u32,
    #[serde(default)]
    pub streak_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub stats: ProfileStats,
    #[serde(default)]
    pub progress_percent: u32,
}

/// Read-only fetches backing the browsing screens.
#[derive(Clone)]
pub struct DashboardClient {
    client: Client,
    config: ApiConfig,
}

impl DashboardClient {
    /// Build a client for `config`.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be constructed.
    pub fn new(config: ApiConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: config.build_client()?,
            config,
        })
    }

    /// Fetch chapters and lessons localized for `language`.
    ///
    /// # Errors
    ///
    /// Returns `DashboardError` on transport, status, or decoding failures.
    pub async fn dashboard(&self, language: Language) -> Result<Dashboard, DashboardError> {
        self.get("student-dashboard", &[("lang", language.code())])
            .await
    }

    /// Fetch the student's profile statistics.
    ///
    /// # Errors
    ///
    /// Returns `DashboardError` on transport, status, or decoding failures.
    pub async fn profile(&self) -> Result<Profile, DashboardError> {
        self.get("profile", &[]).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DashboardError> {
        let request = self.client.get(self.config.url(path)).query(query);
        let response = self.config.authorize(request).send().await?;

        if !response.status().is_success() {
            return Err(DashboardError::HttpStatus(response.status()));
        }
        Ok(response.json().await?)
    }
}
