#[derive(Debug)]
pub struct AppError {
    stage: &'static str,
    detail: Option<String>,
}

impl AppError {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            detail: None,
        }
    }

    pub fn with_detail(stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: Some(detail.into()),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    /// Remote diagnostic detail, kept verbatim for the webhook response body.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn into_detail(self) -> String {
        match self.detail {
            Some(detail) => format!("{}: {}", self.stage, detail),
            None => self.stage.to_string(),
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.stage, detail),
            None => write!(f, "{}", self.stage),
        }
    }
}

impl std::error::Error for AppError {}
