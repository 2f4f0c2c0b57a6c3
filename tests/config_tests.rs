use std::path::PathBuf;
use std::time::Duration;

use navbar_crossfade::config::{Configuration, Length, OverlapPolicy};

const FOUR_IMAGES: &str = r#"
images:
  - { path: "a.jpg", top: 100, left: 40, width: 300, height: 200 }
  - { path: "b.jpg", top: 100, left: 360, width: 300, height: 200 }
  - { path: "c.jpg", top: "50%", left: "10%", width: "25%", height: 200 }
  - { path: "d.jpg", top: 400, left: 360px, width: 300, height: 200 }
links:
  - { label: "Home", top: 20, left: 40, width: 80, height: 24 }
  - { label: "Work", top: 20, left: 140, width: 80, height: 24 }
"#;

#[test]
fn parse_kebab_case_config_with_defaults() {
    let cfg: Configuration = serde_yaml::from_str(FOUR_IMAGES).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.images.len(), 4);
    assert_eq!(cfg.links.len(), 2);
    assert_eq!(cfg.links[0].label.as_deref(), Some("Home"));
    assert_eq!(cfg.transition.duration, Duration::from_secs(2));
    assert!((cfg.transition.target_progress - 4.0).abs() < f32::EPSILON);
    assert!((cfg.transition.initial_progress - 0.2).abs() < f32::EPSILON);
    assert_eq!(cfg.transition.on_overlap, OverlapPolicy::Keep);
    assert!((cfg.render.time_step - 0.1).abs() < f32::EPSILON);
    assert!((cfg.camera.distance - 200.0).abs() < f32::EPSILON);
    assert_eq!(cfg.transition.initial_indices(4), (0, 1));
}

#[test]
fn lengths_accept_pixels_and_percentages() {
    let cfg: Configuration = serde_yaml::from_str(FOUR_IMAGES).unwrap();
    assert_eq!(cfg.images[0].top, Length::Px(100.0));
    assert_eq!(cfg.images[2].top, Length::Percent(50.0));
    assert_eq!(cfg.images[2].width, Length::Percent(25.0));
    assert_eq!(cfg.images[3].left, Length::Px(360.0));
    assert!((Length::Percent(25.0).resolve(800.0) - 200.0).abs() < f32::EPSILON);
}

#[test]
fn invalid_length_is_rejected() {
    let yaml = r#"
images:
  - { path: "a.jpg", top: "wide", left: 0, width: 10, height: 10 }
"#;
    assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
}

#[test]
fn parse_transition_overrides() {
    let yaml = r#"
transition:
  duration: 750ms
  target-progress: 1.0
  start-index: 1
  end-index: 0
  on-overlap: cancel
render:
  time-step: 0.05
images:
  - { path: "a.jpg", top: 0, left: 0, width: 10, height: 10 }
  - { path: "b.jpg", top: 0, left: 20, width: 10, height: 10 }
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.transition.duration, Duration::from_millis(750));
    assert_eq!(cfg.transition.on_overlap, OverlapPolicy::Cancel);
    assert_eq!(cfg.transition.initial_indices(2), (1, 0));
    assert!((cfg.render.time_step - 0.05).abs() < f32::EPSILON);
}

#[test]
fn unknown_fields_are_rejected() {
    let yaml = r#"
images:
  - { path: "a.jpg", top: 0, left: 0, width: 10, height: 10 }
transition:
  durration: 2s
"#;
    assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
}

#[test]
fn validation_requires_images() {
    let cfg: Configuration = serde_yaml::from_str("links: []").unwrap();
    let err = cfg.validated().unwrap_err();
    assert!(err.to_string().contains("at least one"), "{err}");
}

#[test]
fn validation_rejects_out_of_range_indices() {
    let yaml = r#"
transition:
  end-index: 2
images:
  - { path: "a.jpg", top: 0, left: 0, width: 10, height: 10 }
  - { path: "b.jpg", top: 0, left: 20, width: 10, height: 10 }
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert!(cfg.validated().is_err());
}

#[test]
fn validation_rejects_bad_camera() {
    let yaml = r#"
camera:
  distance: 50
  near: 100
  far: 2000
images:
  - { path: "a.jpg", top: 0, left: 0, width: 10, height: 10 }
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    assert!(cfg.validated().is_err());
}

#[test]
fn single_image_defaults_stay_in_range() {
    let yaml = r#"
images:
  - { path: "a.jpg", top: 0, left: 0, width: 10, height: 10 }
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.transition.initial_indices(1), (0, 0));
}

#[test]
fn relative_image_paths_resolve_against_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.yaml");
    std::fs::write(
        &path,
        r#"
images:
  - { path: "img/a.jpg", top: 0, left: 0, width: 10, height: 10 }
  - { path: "/abs/b.jpg", top: 0, left: 20, width: 10, height: 10 }
"#,
    )
    .unwrap();
    let cfg = Configuration::from_yaml_file(&path).unwrap();
    assert_eq!(cfg.images[0].path, dir.path().join("img/a.jpg"));
    assert_eq!(cfg.images[1].path, PathBuf::from("/abs/b.jpg"));
}
