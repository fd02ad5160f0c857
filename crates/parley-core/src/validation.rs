use crate::error::{EngineError, EngineResult};

pub(crate) const MAX_GROUP_NAME_CHARS: usize = 64;
pub(crate) const MAX_MESSAGE_CHARS: usize = 4000;
pub(crate) const MAX_ATTACHMENT_REF_CHARS: usize = 512;
pub(crate) const MAX_PAGE_SIZE: u32 = 100;

pub(crate) fn group_name(raw: &str) -> EngineResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(EngineError::validation("Group name must not be empty"));
    }
    if name.chars().count() > MAX_GROUP_NAME_CHARS {
        return Err(EngineError::validation(format!(
            "Group name exceeds {} characters",
            MAX_GROUP_NAME_CHARS
        )));
    }
    Ok(name.to_string())
}

pub(crate) fn message_text(raw: &str) -> EngineResult<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(EngineError::validation("Message text must not be empty"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(EngineError::validation(format!(
            "Message text exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(text.to_string())
}

/// Blank refs collapse to `None`.
pub(crate) fn attachment_ref(raw: Option<&str>) -> EngineResult<Option<String>> {
    let Some(r) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if r.chars().count() > MAX_ATTACHMENT_REF_CHARS {
        return Err(EngineError::validation(format!(
            "Attachment reference exceeds {} characters",
            MAX_ATTACHMENT_REF_CHARS
        )));
    }
    Ok(Some(r.to_string()))
}

pub(crate) fn page_size(requested: u32) -> u32 {
    requested.clamp(1, MAX_PAGE_SIZE)
}
