use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 章节中的一张图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterImage {
    pub url: String,
    pub filename: String,
    pub filename_without_ext: String,
    /// 还原所需的条带数，0 表示原图可直接使用
    pub strip_count: u32,
    /// 从 1 开始的页码
    pub index: usize,
}

/// 章节图片清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterManifest {
    pub chapter_id: String,
    pub scramble_id: u64,
    pub images: Vec<ChapterImage>,
}

impl ChapterManifest {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumChapter {
    pub id: String,
    pub title: String,
    pub order: u32,
}

/// 作品信息（只保留下载需要的部分）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumInfo {
    pub id: String,
    pub title: String,
    pub chapters: Vec<AlbumChapter>,
}

/// 接口的通用响应外壳
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default, alias = "errorMsg")]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Value,
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl AlbumInfo {
    /// 从 `/album` 的 data 中提取作品信息。
    /// 没有 series 的作品自身就是唯一章节。
    pub fn from_value(album_id: &str, data: &Value) -> Option<Self> {
        let title = data.get("name").and_then(value_to_string)?;
        let id = data
            .get("id")
            .and_then(value_to_string)
            .unwrap_or_else(|| album_id.to_string());

        let mut chapters: Vec<AlbumChapter> = data
            .get("series")
            .and_then(|s| s.as_array())
            .map(|series| {
                series
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, item)| {
                        let id = item.get("id").and_then(value_to_string)?;
                        let order = item
                            .get("sort")
                            .and_then(value_to_string)
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(idx as u32 + 1);
                        let name = item
                            .get("name")
                            .and_then(value_to_string)
                            .filter(|n| !n.trim().is_empty())
                            .unwrap_or_else(|| format!("第{}话", order));
                        Some(AlbumChapter {
                            id,
                            title: name,
                            order,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        if chapters.is_empty() {
            chapters.push(AlbumChapter {
                id: id.clone(),
                title: title.clone(),
                order: 1,
            });
        }
        chapters.sort_by_key(|c| c.order);

        Some(Self {
            id,
            title,
            chapters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn album_without_series_is_single_chapter() {
        let data = json!({"id": 350234, "name": "单本作品", "series": []});
        let album = AlbumInfo::from_value("350234", &data).unwrap();
        assert_eq!(album.chapters.len(), 1);
        assert_eq!(album.chapters[0].id, "350234");
        assert_eq!(album.chapters[0].title, "单本作品");
    }

    #[test]
    fn album_series_are_ordered() {
        let data = json!({
            "id": "1",
            "name": "连载",
            "series": [
                {"id": "12", "name": "", "sort": "2"},
                {"id": "11", "name": "开端", "sort": "1"}
            ]
        });
        let album = AlbumInfo::from_value("1", &data).unwrap();
        let ids: Vec<_> = album.chapters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["11", "12"]);
        assert_eq!(album.chapters[1].title, "第2话");
    }

    #[test]
    fn album_requires_a_name() {
        assert!(AlbumInfo::from_value("1", &json!({"id": 1})).is_none());
    }
}
