//! 目录列表构建与 HTML 渲染。

use askama::Template;
use chrono::{DateTime, Local};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::cmp::Ordering;
use std::io;
use std::path::Path;
use tokio::fs;

/// 链接中保持原样的字符（RFC 3986 unreserved）。
const LINK_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const SIZE_UNITS: [char; 6] = ['k', 'M', 'G', 'T', 'P', 'E'];

/// 一个目录的直接子项，可直接交给模板渲染。
#[derive(Debug)]
pub struct Listing {
    pub display_path: String,
    pub entries: Vec<Entry>,
}

#[derive(Debug)]
pub struct Entry {
    pub name: String,
    pub size_label: String,
    pub mod_time_label: String,
    pub link: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage<'a> {
    listing: &'a Listing,
    show_parent: bool,
}

impl Listing {
    /// 读取 `dir` 的直接子项（不递归），目录在前，其余按名称忽略大小写排序。
    ///
    /// 符号链接不会出现在列表中：路径解析拒绝任何经过符号链接的请求。
    pub async fn build(dir: &Path, display_path: &str) -> io::Result<Self> {
        let mut read_dir = fs::read_dir(dir).await?;
        let mut raw = Vec::new();

        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.file_type().is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let modified = metadata.modified()?;
            raw.push((name, metadata.is_dir(), metadata.len(), modified));
        }

        raw.sort_by(|a, b| match (a.1, b.1) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.0.to_lowercase().cmp(&b.0.to_lowercase()),
        });

        let entries = raw
            .into_iter()
            .map(|(name, is_dir, size, modified)| {
                let mod_time_label = format_mod_time(modified.into());
                let link = utf8_percent_encode(&name, LINK_ENCODE_SET).to_string();
                if is_dir {
                    Entry {
                        name: format!("{name}/"),
                        size_label: "-".to_string(),
                        mod_time_label,
                        link: format!("{link}/"),
                    }
                } else {
                    Entry {
                        name,
                        size_label: format_bytes(size),
                        mod_time_label,
                        link,
                    }
                }
            })
            .collect();

        Ok(Self {
            display_path: display_path.to_string(),
            entries,
        })
    }

    /// 通过列表模板渲染为 HTML。
    pub fn render(&self) -> Result<String, askama::Error> {
        IndexPage {
            listing: self,
            show_parent: self.display_path != "/",
        }
        .render()
    }
}

/// 以十进制（1000 进位）单位格式化字节数。
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    if bytes < UNIT {
        return format!("{bytes} B");
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes as f64 / div as f64, SIZE_UNITS[exp])
}

fn format_mod_time(modified: DateTime<Local>) -> String {
    modified.format("%Y-%m-%d %H:%M").to_string()
}
