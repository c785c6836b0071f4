//! Minimal report document model rendered to Markdown.

use std::path::Path;

use tracing::info;

use tenantmove_shared::{MigrationError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph(String),
    Bullet(String),
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

/// An ordered list of blocks under a title.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub title: String,
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            blocks: Vec::new(),
        }
    }

    pub fn heading(&mut self, level: u8, text: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Heading {
            level: level.clamp(1, 6),
            text: text.into(),
        });
        self
    }

    pub fn paragraph(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Paragraph(text.into()));
        self
    }

    pub fn bullet(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Bullet(text.into()));
        self
    }

    /// One bullet per item, or `empty` as a paragraph when there are none.
    pub fn bullets<I, S>(&mut self, items: I, empty: &str) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.blocks.len();
        for item in items {
            self.bullet(item);
        }
        if self.blocks.len() == before {
            self.paragraph(empty);
        }
        self
    }

    pub fn table(&mut self, headers: &[&str], rows: Vec<Vec<String>>) -> &mut Self {
        self.blocks.push(Block::Table {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        });
        self
    }

    /// Append another document's blocks (its title becomes a level-2 heading).
    pub fn append(&mut self, other: Document) -> &mut Self {
        self.heading(2, other.title);
        self.blocks.extend(other.blocks);
        self
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# {}\n", self.title));

        let mut previous_bullet = false;
        for block in &self.blocks {
            let is_bullet = matches!(block, Block::Bullet(_));
            if !(is_bullet && previous_bullet) {
                out.push('\n');
            }
            previous_bullet = is_bullet;

            match block {
                Block::Heading { level, text } => {
                    out.push_str(&format!("{} {text}\n", "#".repeat(usize::from(*level))));
                }
                Block::Paragraph(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                Block::Bullet(text) => {
                    out.push_str(&format!("- {text}\n"));
                }
                Block::Table { headers, rows } => render_table(&mut out, headers, rows),
            }
        }
        out
    }

    /// Render to Markdown and write to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| MigrationError::io(parent, e))?;
        }
        std::fs::write(path, self.render_markdown()).map_err(|e| MigrationError::io(path, e))?;
        info!(path = %path.display(), blocks = self.blocks.len(), "wrote report");
        Ok(())
    }
}

fn render_table(out: &mut String, headers: &[String], rows: &[Vec<String>]) {
    let cells = |cells: &[String]| -> String {
        cells
            .iter()
            .map(|c| escape_cell(c))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    out.push_str(&format!("| {} |\n", cells(headers)));
    out.push_str(&format!("|{}|\n", vec!["---"; headers.len()].join("|")));
    for row in rows {
        out.push_str(&format!("| {} |\n", cells(row)));
    }
}

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_blocks() {
        let mut doc = Document::new("Instance Analysis");
        doc.heading(2, "Projects")
            .paragraph("2 projects to add.")
            .bullet("ABC")
            .bullet("OPS")
            .table(&["Key", "Name"], vec![vec!["A|B".into(), "Line\nbreak".into()]]);

        let md = doc.render_markdown();
        assert_eq!(
            md,
            "# Instance Analysis\n\n## Projects\n\n2 projects to add.\n\n- ABC\n- OPS\n\n| Key | Name |\n|---|---|\n| A\\|B | Line break |\n"
        );
    }

    #[test]
    fn bullets_fall_back_to_empty_text() {
        let mut doc = Document::new("t");
        doc.bullets(Vec::<String>::new(), "Nothing to migrate.");
        assert_eq!(doc.blocks, vec![Block::Paragraph("Nothing to migrate.".into())]);
    }

    #[test]
    fn append_nests_under_heading() {
        let mut outer = Document::new("Report");
        let mut inner = Document::new("Global Permissions");
        inner.paragraph("none");
        outer.append(inner);
        assert_eq!(outer.blocks.len(), 2);
        assert!(matches!(&outer.blocks[0], Block::Heading { level: 2, text } if text == "Global Permissions"));
    }

    #[test]
    fn writes_file() {
        let path = std::env::temp_dir()
            .join(format!("tm-doc-{}", uuid::Uuid::now_v7()))
            .join("report.md");
        let mut doc = Document::new("Report");
        doc.paragraph("hello");
        doc.write_to(&path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("hello"));
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }
}
