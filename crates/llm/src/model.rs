#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub description: Option<String>,
}

impl Model {
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

pub fn default_openai_models() -> Vec<Model> {
    vec![
        Model::from_id("gpt-4o-mini").with_description("Balanced cost/performance default"),
        Model::from_id("gpt-4o").with_description("High quality general model"),
    ]
}

/// Returns the catalogue entry for `model_id`, if it is one of the offered models.
pub fn find_model<'a>(models: &'a [Model], model_id: &str) -> Option<&'a Model> {
    let model_id = model_id.trim();
    models.iter().find(|model| model.id == model_id)
}
