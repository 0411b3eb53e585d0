//! Remote file editor buffer

/// Syntax mode for an editor, derived from the file extension.
pub fn language_for_path(path: &str) -> &'static str {
    let extension = path.rsplit('.').next().unwrap_or("");
    match extension.to_ascii_lowercase().as_str() {
        "js" => "javascript",
        "py" => "python",
        "html" | "htm" => "html",
        "css" => "css",
        "json" => "json",
        "md" => "markdown",
        "sh" | "bash" => "shell",
        _ => "text",
    }
}

/// In-memory buffer for a remote file being edited.
///
/// The buffer tracks dirtiness locally; a failed save leaves it dirty
/// so the user's edits survive the error.
#[derive(Debug, Clone)]
pub struct EditorBuffer {
    pub path: String,
    pub content: String,
    pub language: &'static str,
    dirty: bool,
}

impl EditorBuffer {
    pub fn new(path: String, content: String) -> Self {
        let language = language_for_path(&path);
        Self {
            path,
            content,
            language,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_content(&mut self, content: String) {
        if content != self.content {
            self.content = content;
            self.dirty = true;
        }
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}
