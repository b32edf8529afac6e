// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/model/labels.rs - 类别标签表
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  path::Path,
  sync::{Arc, OnceLock},
};

use thiserror::Error;
use tracing::info;

pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum LabelTableError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("标签表为空")]
  Empty,
}

/// 类别 ID -> 名称，初始化后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  names: Vec<String>,
}

impl LabelTable {
  /// 进程内共享的 COCO-SSD 标签表
  pub fn coco() -> Arc<LabelTable> {
    static COCO: OnceLock<Arc<LabelTable>> = OnceLock::new();
    COCO
      .get_or_init(|| Arc::new(LabelTable::from_names(COCO_SSD_LABELS)))
      .clone()
  }

  pub fn from_names<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  /// 读取 JSON 字符串数组，下标即类别 ID
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LabelTableError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let names: Vec<String> = serde_json::from_str(&content)?;
    if names.is_empty() {
      return Err(LabelTableError::Empty);
    }
    info!("加载标签表 {}: {} 个类别", path.display(), names.len());
    Ok(Self { names })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: i64) -> Option<&str> {
    usize::try_from(class_id)
      .ok()
      .and_then(|i| self.names.get(i))
      .map(String::as_str)
  }

  /// 模型输出的类别是浮点数，四舍五入到整数后查表
  pub fn resolve(&self, class_value: f32) -> (i64, &str) {
    let class_id = class_value.round() as i64;
    (class_id, self.get(class_id).unwrap_or(UNKNOWN_LABEL))
  }
}

pub const COCO_SSD_LABELS: [&str; 183] = [
  "unlabeled",
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "street sign",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "hat",
  "backpack",
  "umbrella",
  "shoe",
  "eye glasses",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "plate",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "mirror",
  "dining table",
  "window",
  "desk",
  "toilet",
  "door",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "blender",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
  "hair brush",
  "banner",
  "blanket",
  "branch",
  "bridge",
  "building-other",
  "bush",
  "cabinet",
  "cage",
  "cardboard",
  "carpet",
  "ceiling-other",
  "ceiling-tile",
  "cloth",
  "clothes",
  "clouds",
  "counter",
  "cupboard",
  "curtain",
  "desk-stuff",
  "dirt",
  "door-stuff",
  "fence",
  "floor-marble",
  "floor-other",
  "floor-stone",
  "floor-tile",
  "floor-wood",
  "flower",
  "fog",
  "food-other",
  "fruit",
  "furniture-other",
  "grass",
  "gravel",
  "ground-other",
  "hill",
  "house",
  "leaves",
  "light",
  "mat",
  "metal",
  "mirror-stuff",
  "moss",
  "mountain",
  "mud",
  "napkin",
  "net",
  "paper",
  "pavement",
  "pillow",
  "plant-other",
  "plastic",
  "platform",
  "playingfield",
  "railing",
  "railroad",
  "river",
  "road",
  "rock",
  "roof",
  "rug",
  "salad",
  "sand",
  "sea",
  "shelf",
  "sky-other",
  "skyscraper",
  "snow",
  "solid-other",
  "stairs",
  "stone",
  "straw",
  "structural-other",
  "table",
  "tent",
  "textile-other",
  "towel",
  "tree",
  "vegetable",
  "wall-brick",
  "wall-concrete",
  "wall-other",
  "wall-panel",
  "wall-stone",
  "wall-tile",
  "wall-wood",
  "water-other",
  "waterdrops",
  "window-blind",
  "window-other",
  "wood",
];
