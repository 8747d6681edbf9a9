use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnquiryError {
    #[error("intent classifier must be trained before classification")]
    ClassifierNotTrained,
    #[error("message is empty")]
    EmptyMessage,
    #[error("template references unknown field `{0}`")]
    MissingTemplateField(String),
}
