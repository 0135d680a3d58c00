use serde::Serialize;

/// Raw query string of `GET /api`. Missing parameters are empty strings.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CreateParams {
    pub url: String,
    pub title: String,
    pub format: String,
    pub redirect_type: String,
    pub redirect_time: String,
}

/// Builds the params from decoded query pairs. A repeated key keeps its last
/// value and unknown keys are ignored.
impl FromIterator<(String, String)> for CreateParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(pairs: I) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "url" => &mut params.url,
                "title" => &mut params.title,
                "format" => &mut params.format,
                "type" => &mut params.redirect_type,
                "time" => &mut params.redirect_time,
                _ => continue,
            };
            *slot = value;
        }
        params
    }
}

/// Result bundle of `GET /api`, rendered by [`crate::serializer`].
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ApiResponse {
    pub error: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    #[must_use]
    pub const fn created(short_url: String) -> Self {
        Self {
            error: 0,
            url: Some(short_url),
            message: None,
        }
    }

    #[must_use]
    pub fn failed(message: &str) -> Self {
        Self {
            error: 1,
            url: None,
            message: Some(message.to_owned()),
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error != 0
    }
}
