use std::cmp::Ordering;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref INVALID_SEGMENT_CHARS: Regex = Regex::new(r#"[\\/:*?"<>|]"#).unwrap();
    static ref NATURAL_CHUNK: Regex = Regex::new(r"\d+|\D+").unwrap();
}

/// 本地存储认可的图片扩展名
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// 清理目录名中的非法字符，空结果回退为 `unnamed`
pub fn sanitize_segment(name: &str) -> String {
    let cleaned = INVALID_SEGMENT_CHARS.replace_all(name, "_");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 取文件扩展名（不含点），没有扩展名时返回 None
pub fn extension_of(filename: &str) -> Option<&str> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext)
}

/// 去掉最后一个扩展名
pub fn strip_extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => stem,
        _ => filename,
    }
}

/// 落盘文件名: 三位序号 + 原扩展名（缺省 png）
pub fn image_filename(index: usize, original_filename: &str) -> String {
    let ext = extension_of(original_filename).unwrap_or("png");
    sanitize_segment(&format!("{:03}.{}", index, ext))
}

pub fn is_image_file(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[derive(Debug, PartialEq, Eq)]
enum NaturalChunk {
    Number(u128),
    Text(String),
}

fn natural_key(text: &str) -> Vec<NaturalChunk> {
    NATURAL_CHUNK
        .find_iter(text)
        .map(|m| match m.as_str().parse::<u128>() {
            Ok(n) => NaturalChunk::Number(n),
            Err(_) => NaturalChunk::Text(m.as_str().to_lowercase()),
        })
        .collect()
}

/// 自然排序: `2.png` 排在 `10.png` 之前
pub fn compare_natural(a: &str, b: &str) -> Ordering {
    let key_a = natural_key(a);
    let key_b = natural_key(b);
    for (x, y) in key_a.iter().zip(key_b.iter()) {
        let ord = match (x, y) {
            (NaturalChunk::Number(x), NaturalChunk::Number(y)) => x.cmp(y),
            (NaturalChunk::Text(x), NaturalChunk::Text(y)) => x.cmp(y),
            // 数字段排在文本段之前
            (NaturalChunk::Number(_), NaturalChunk::Text(_)) => Ordering::Less,
            (NaturalChunk::Text(_), NaturalChunk::Number(_)) => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    key_a.len().cmp(&key_b.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_segment("a/b:c"), "a_b_c");
        assert_eq!(sanitize_segment(r#"x\y*z?"<>|"#), "x_y_z_____");
        assert_eq!(sanitize_segment("  第1话  "), "第1话");
    }

    #[test]
    fn sanitize_falls_back_to_unnamed() {
        assert_eq!(sanitize_segment(""), "unnamed");
        assert_eq!(sanitize_segment("   "), "unnamed");
    }

    #[test]
    fn image_filename_pads_and_keeps_extension() {
        assert_eq!(image_filename(1, "00001.webp"), "001.webp");
        assert_eq!(image_filename(42, "cover.jpg"), "042.jpg");
        assert_eq!(image_filename(7, "noext"), "007.png");
        assert_eq!(image_filename(1234, "a.png"), "1234.png");
    }

    #[test]
    fn strip_extension_keeps_dotfiles() {
        assert_eq!(strip_extension("00001.webp"), "00001");
        assert_eq!(strip_extension("a.b.jpg"), "a.b");
        assert_eq!(strip_extension("plain"), "plain");
        assert_eq!(strip_extension(".hidden"), ".hidden");
    }

    #[test]
    fn natural_order_compares_numbers_by_value() {
        let mut names = vec!["10.png", "2.png", "1.png", "001a.png"];
        names.sort_by(|a, b| compare_natural(a, b));
        assert_eq!(names, vec!["1.png", "001a.png", "2.png", "10.png"]);
    }

    #[test]
    fn image_file_filter() {
        assert!(is_image_file("001.WEBP"));
        assert!(is_image_file("a.jpeg"));
        assert!(!is_image_file("notes.txt"));
        assert!(!is_image_file("jpg"));
    }
}
