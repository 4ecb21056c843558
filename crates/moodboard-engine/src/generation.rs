use crate::resolve::ImageBytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPart {
    Text(String),
    Image(ImageBytes),
}

/// One image-only generation call. Parts are sent in order; the model reads
/// the first image as the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub parts: Vec<RequestPart>,
    pub image_size: String,
}

impl GenerationRequest {
    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, RequestPart::Image(_)))
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    InlineData {
        mime_type: Option<String>,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResponse {
    pub parts: Vec<ResponsePart>,
}

pub trait GenerationCapability: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResponse>;
}
