//! Source documents for the semantic index

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::{Error, Result};

/// File extensions read as UTF-8 text
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "rst", "html", "json", "csv"];

/// A single source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Stable identifier derived from the relative path
    pub id: String,
    /// Path relative to the corpus root
    pub source: String,
    /// Full document text
    pub text: String,
}

/// Ordered set of documents read from a directory
#[derive(Debug, Clone)]
pub struct DocumentCorpus {
    root: PathBuf,
    documents: Vec<Document>,
    skipped: Vec<String>,
}

impl DocumentCorpus {
    /// Read every text document under `root`, recursively, in path order
    ///
    /// Hidden files and directories are skipped silently. Files with an
    /// unsupported extension are skipped with a warning and listed in
    /// [`skipped`](Self::skipped).
    ///
    /// # Errors
    ///
    /// Returns `Error::Corpus` if the directory is missing or unreadable, a
    /// document is not valid UTF-8, or no documents are found
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::Corpus(format!(
                "corpus directory {} does not exist",
                root.display()
            )));
        }

        let mut documents = Vec::new();
        let mut skipped = Vec::new();
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| Error::Corpus(format!("failed to walk corpus: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let source = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if !is_text_file(path) {
                tracing::warn!(path = %path.display(), "skipping file with unsupported extension");
                skipped.push(source);
                continue;
            }

            let text = std::fs::read_to_string(path).map_err(|e| {
                Error::Corpus(format!("failed to read {}: {e}", path.display()))
            })?;
            if text.trim().is_empty() {
                tracing::warn!(path = %path.display(), "skipping empty document");
                continue;
            }

            documents.push(Document {
                id: document_id(&source),
                source,
                text,
            });
        }

        if documents.is_empty() {
            return Err(Error::Corpus(format!(
                "no documents found in {}",
                root.display()
            )));
        }

        tracing::info!(
            root = %root.display(),
            documents = documents.len(),
            skipped = skipped.len(),
            "loaded corpus"
        );
        Ok(Self {
            root: root.to_path_buf(),
            documents,
            skipped,
        })
    }

    /// Corpus root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Documents in path order
    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Files left out for their extension, relative to the root
    #[must_use]
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Number of documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Always false for a loaded corpus
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Content hash over every document's source and text
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for doc in &self.documents {
            hasher.update(doc.source.as_bytes());
            hasher.update([0]);
            hasher.update(doc.text.as_bytes());
            hasher.update([0]);
        }
        hex::encode(hasher.finalize())
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TEXT_EXTENSIONS.iter().any(|t| t.eq_ignore_ascii_case(ext)))
}

fn document_id(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, text: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, text).unwrap();
    }

    #[test]
    fn loads_documents_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.md", "second");
        write(dir.path(), "a.txt", "first");
        write(dir.path(), "nested/c.rst", "third");

        let corpus = DocumentCorpus::load(dir.path()).unwrap();
        let sources: Vec<_> = corpus.documents().iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["a.txt", "b.md", "nested/c.rst"]);
    }

    #[test]
    fn skips_hidden_and_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "doc.md", "kept");
        write(dir.path(), ".secret.md", "hidden");
        write(dir.path(), ".git/notes.txt", "hidden dir");
        write(dir.path(), "image.png", "binary-ish");

        let corpus = DocumentCorpus::load(dir.path()).unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.documents()[0].text, "kept");
        assert_eq!(corpus.skipped(), ["image.png"]);
    }

    #[test]
    fn unsupported_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "guide.md", "kept");
        write(dir.path(), "manual.pdf", "%PDF-1.7");
        write(dir.path(), "specs/sheet.docx", "zip");

        let corpus = DocumentCorpus::load(dir.path()).unwrap();
        assert_eq!(corpus.skipped(), ["manual.pdf", "specs/sheet.docx"]);
    }

    #[test]
    fn missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DocumentCorpus::load(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::Corpus(_)));
    }

    #[test]
    fn empty_corpus_is_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "blank.txt", "   \n");
        let err = DocumentCorpus::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Corpus(_)));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "one");
        let before = DocumentCorpus::load(dir.path()).unwrap().fingerprint();
        write(dir.path(), "a.txt", "two");
        let after = DocumentCorpus::load(dir.path()).unwrap().fingerprint();
        assert_ne!(before, after);
        assert_eq!(before.len(), 64);
    }
}
