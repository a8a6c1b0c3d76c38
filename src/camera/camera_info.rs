//! Raw calibration record, mirroring the ROS `sensor_msgs/CameraInfo` message.
//!
//! A [`CameraInfo`] can be built in memory, loaded from a ROS calibration YAML
//! file (the format written by `camera_calibration`), or read from the JSON
//! form of the message.

use nalgebra::{Matrix3, Matrix3x4};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::{Yaml, YamlLoader};

use crate::camera::{CameraModelError, RegionOfInterest, Resolution};

fn identity_rotation() -> [f64; 9] {
    [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
}

/// Calibration record of a single camera.
///
/// Matrices are stored row-major exactly as in the ROS message. Binning
/// factors of 0 and an all-zero ROI carry the ROS meaning "no binning" and
/// "full image".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub height: u32,
    pub width: u32,
    #[serde(default)]
    pub distortion_model: String,
    /// Distortion coefficients, length depends on `distortion_model`.
    #[serde(rename = "D", alias = "d", default)]
    pub d: Vec<f64>,
    /// Intrinsic camera matrix of the raw image.
    #[serde(rename = "K", alias = "k")]
    pub k: [f64; 9],
    /// Rectification rotation.
    #[serde(rename = "R", alias = "r", default = "identity_rotation")]
    pub r: [f64; 9],
    /// Projection matrix of the rectified image.
    #[serde(rename = "P", alias = "p")]
    pub p: [f64; 12],
    #[serde(default)]
    pub binning_x: u32,
    #[serde(default)]
    pub binning_y: u32,
    #[serde(default)]
    pub roi: RegionOfInterest,
}

impl CameraInfo {
    /// Builds a record from nalgebra matrices, with no binning and a full ROI.
    pub fn from_matrices(
        resolution: Resolution,
        distortion_model: &str,
        d: &[f64],
        k: &Matrix3<f64>,
        r: &Matrix3<f64>,
        p: &Matrix3x4<f64>,
    ) -> Self {
        let mut k_data = [0.0; 9];
        let mut r_data = [0.0; 9];
        let mut p_data = [0.0; 12];
        for row in 0..3 {
            for col in 0..3 {
                k_data[row * 3 + col] = k[(row, col)];
                r_data[row * 3 + col] = r[(row, col)];
            }
            for col in 0..4 {
                p_data[row * 4 + col] = p[(row, col)];
            }
        }

        CameraInfo {
            height: resolution.height,
            width: resolution.width,
            distortion_model: distortion_model.to_string(),
            d: d.to_vec(),
            k: k_data,
            r: r_data,
            p: p_data,
            binning_x: 0,
            binning_y: 0,
            roi: RegionOfInterest::default(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    /// Loads a ROS calibration YAML file.
    ///
    /// The file holds `image_width`, `image_height`, `distortion_model` and the
    /// matrices `camera_matrix`, `distortion_coefficients`,
    /// `rectification_matrix` and `projection_matrix`, each as
    /// `{rows, cols, data}`. Optional `binning_x`, `binning_y` and `roi` keys
    /// are read when present.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`] if the file cannot be read.
    /// * [`CameraModelError::YamlError`] if the YAML is malformed.
    /// * [`CameraModelError::InvalidParams`] if a key is missing or a matrix
    ///   has the wrong shape.
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, CameraModelError> {
        let docs = YamlLoader::load_from_str(contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraModelError::InvalidParams("Empty YAML document".to_string()))?;

        let width = yaml_u32(doc, "image_width")?.ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'image_width'".to_string())
        })?;
        let height = yaml_u32(doc, "image_height")?.ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'image_height'".to_string())
        })?;
        let distortion_model = doc["distortion_model"]
            .as_str()
            .ok_or_else(|| {
                CameraModelError::InvalidParams("YAML missing 'distortion_model'".to_string())
            })?
            .to_string();

        let k = yaml_matrix(doc, "camera_matrix", Some(3), Some(3))?;
        let d = yaml_matrix(doc, "distortion_coefficients", Some(1), None)?;
        let r = if doc["rectification_matrix"].is_badvalue() {
            identity_rotation().to_vec()
        } else {
            yaml_matrix(doc, "rectification_matrix", Some(3), Some(3))?
        };
        let p = yaml_matrix(doc, "projection_matrix", Some(3), Some(4))?;

        let roi_node = &doc["roi"];
        let roi = if roi_node.is_badvalue() {
            RegionOfInterest::default()
        } else {
            RegionOfInterest {
                x_offset: yaml_u32(roi_node, "x_offset")?.unwrap_or(0),
                y_offset: yaml_u32(roi_node, "y_offset")?.unwrap_or(0),
                height: yaml_u32(roi_node, "height")?.unwrap_or(0),
                width: yaml_u32(roi_node, "width")?.unwrap_or(0),
                do_rectify: roi_node["do_rectify"].as_bool().unwrap_or(false),
            }
        };

        let mut info = CameraInfo {
            height,
            width,
            distortion_model,
            d,
            k: [0.0; 9],
            r: [0.0; 9],
            p: [0.0; 12],
            binning_x: yaml_u32(doc, "binning_x")?.unwrap_or(0),
            binning_y: yaml_u32(doc, "binning_y")?.unwrap_or(0),
            roi,
        };
        info.k.copy_from_slice(&k);
        info.r.copy_from_slice(&r);
        info.p.copy_from_slice(&p);
        Ok(info)
    }

    /// Saves the record as a ROS calibration YAML file.
    ///
    /// Binning and ROI are only written when they differ from their defaults,
    /// so files of plain calibrations stay readable by ROS tools.
    pub fn save_to_yaml(&self, path: &str, camera_name: &str) -> Result<(), CameraModelError> {
        fn key(name: &str) -> serde_yaml::Value {
            serde_yaml::Value::String(name.to_string())
        }
        fn matrix(
            rows: usize,
            cols: usize,
            data: &[f64],
        ) -> Result<serde_yaml::Value, CameraModelError> {
            Ok(serde_yaml::to_value(&serde_yaml::Mapping::from_iter([
                (key("rows"), serde_yaml::to_value(rows)?),
                (key("cols"), serde_yaml::to_value(cols)?),
                (key("data"), serde_yaml::to_value(data)?),
            ]))?)
        }

        let mut mapping = serde_yaml::Mapping::from_iter([
            (key("image_width"), serde_yaml::to_value(self.width)?),
            (key("image_height"), serde_yaml::to_value(self.height)?),
            (key("camera_name"), key(camera_name)),
            (key("camera_matrix"), matrix(3, 3, &self.k)?),
            (key("distortion_model"), key(&self.distortion_model)),
            (
                key("distortion_coefficients"),
                matrix(1, self.d.len(), &self.d)?,
            ),
            (key("rectification_matrix"), matrix(3, 3, &self.r)?),
            (key("projection_matrix"), matrix(3, 4, &self.p)?),
        ]);
        if self.binning_x > 1 || self.binning_y > 1 {
            mapping.insert(key("binning_x"), serde_yaml::to_value(self.binning_x)?);
            mapping.insert(key("binning_y"), serde_yaml::to_value(self.binning_y)?);
        }
        if !self.roi.is_unset() {
            mapping.insert(key("roi"), serde_yaml::to_value(self.roi)?);
        }

        let yaml_string = serde_yaml::to_string(&mapping)?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }

    /// Parses the JSON form of the message (`D`, `K`, `R`, `P` keys; the
    /// lowercase ROS 2 spelling is accepted too).
    pub fn from_json_str(json: &str) -> Result<Self, CameraModelError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load_from_json(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> Result<String, CameraModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn yaml_f64(value: &Yaml) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

fn yaml_u32(node: &Yaml, key: &str) -> Result<Option<u32>, CameraModelError> {
    let value = &node[key];
    if value.is_badvalue() {
        return Ok(None);
    }
    value
        .as_i64()
        .and_then(|v| u32::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| {
            CameraModelError::InvalidParams(format!("Invalid '{key}': not a non-negative integer"))
        })
}

fn yaml_matrix(
    doc: &Yaml,
    key: &str,
    rows: Option<usize>,
    cols: Option<usize>,
) -> Result<Vec<f64>, CameraModelError> {
    let node = &doc[key];
    if node.is_badvalue() {
        return Err(CameraModelError::InvalidParams(format!(
            "YAML missing '{key}'"
        )));
    }

    let shape = |field: &str| -> Result<usize, CameraModelError> {
        node[field]
            .as_i64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| {
                CameraModelError::InvalidParams(format!("Invalid '{key}.{field}'"))
            })
    };
    let found_rows = shape("rows")?;
    let found_cols = shape("cols")?;
    if rows.is_some_and(|r| r != found_rows) || cols.is_some_and(|c| c != found_cols) {
        return Err(CameraModelError::InvalidParams(format!(
            "'{key}' has shape {found_rows}x{found_cols}, expected {}x{}",
            rows.map_or("n".to_string(), |r| r.to_string()),
            cols.map_or("n".to_string(), |c| c.to_string()),
        )));
    }

    let data = node["data"].as_vec().ok_or_else(|| {
        CameraModelError::InvalidParams(format!("YAML missing '{key}.data' or not an array"))
    })?;
    if data.len() != found_rows * found_cols {
        return Err(CameraModelError::InvalidParams(format!(
            "'{key}' declares {found_rows}x{found_cols} but holds {} values",
            data.len()
        )));
    }

    data.iter()
        .enumerate()
        .map(|(i, value)| {
            yaml_f64(value).ok_or_else(|| {
                CameraModelError::InvalidParams(format!("Invalid '{key}' entry at index {i}"))
            })
        })
        .collect()
}
