use std::path::{Path, PathBuf};

fn exe() -> PathBuf {
    option_env!("CARGO_BIN_EXE_julia-anim")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .join("target")
                .join("debug");
            p.push(if cfg!(windows) {
                "julia-anim.exe"
            } else {
                "julia-anim"
            });
            p
        })
}

fn test_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("cli_smoke").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_palette(dir: &Path) -> PathBuf {
    let path = dir.join("palette.png");
    image::save_buffer_with_format(
        &path,
        &[255, 0, 0, 0, 255, 0, 0, 0, 255],
        3,
        1,
        image::ColorType::Rgb8,
        image::ImageFormat::Png,
    )
    .unwrap();
    path
}

#[test]
fn cli_renders_frames_on_the_cpu() {
    let dir = test_dir("frames");
    let palette = write_palette(&dir);
    let out_dir = dir.join("out");

    let status = std::process::Command::new(exe())
        .args(["--backend", "cpu", "--size", "16", "--frames", "2"])
        .arg("--palette")
        .arg(&palette)
        .arg("--out-dir")
        .arg(&out_dir)
        .status()
        .unwrap();

    assert!(status.success());
    assert!(out_dir.join("F0000.png").exists());
    assert!(out_dir.join("F0001.png").exists());
    assert!(!out_dir.join("F0002.png").exists());
}

#[test]
fn cli_reads_json_config_and_flags_override_it() {
    let dir = test_dir("config");
    let palette = write_palette(&dir);
    let out_dir = dir.join("out");
    let cfg_path = dir.join("run.json");

    let cfg = serde_json::json!({
        "size": 64,
        "frames": 1,
        "palette": palette,
        "format": "ppm",
        "out_dir": out_dir,
        "sweep": { "c_re": -0.8, "c_im": 0.156 },
    });
    std::fs::write(&cfg_path, serde_json::to_vec_pretty(&cfg).unwrap()).unwrap();

    let status = std::process::Command::new(exe())
        .args(["--backend", "cpu", "--size", "8"])
        .arg("--config")
        .arg(&cfg_path)
        .status()
        .unwrap();

    assert!(status.success());
    let bytes = std::fs::read(out_dir.join("F0000.ppm")).unwrap();
    assert!(bytes.starts_with(b"P6\n8 8\n255\n"));
}

#[test]
fn cli_exits_non_zero_on_a_bad_palette() {
    let dir = test_dir("bad_palette");
    let palette = dir.join("palette.png");
    std::fs::write(&palette, b"garbage").unwrap();
    let out_dir = dir.join("out");

    let output = std::process::Command::new(exe())
        .args(["--backend", "cpu", "--size", "8"])
        .arg("--palette")
        .arg(&palette)
        .arg("--out-dir")
        .arg(&out_dir)
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("palette decode failed"));
    assert!(!out_dir.exists());
}

#[test]
fn cli_writes_the_build_log_on_program_failure() {
    let dir = test_dir("bad_kernel");
    let palette = write_palette(&dir);
    let kernel = dir.join("broken.wgsl");
    std::fs::write(&kernel, "fn even_re() {}\n").unwrap();

    let output = std::process::Command::new(exe())
        .current_dir(&dir)
        .args(["--backend", "cpu", "--size", "8"])
        .arg("--palette")
        .arg(palette.canonicalize().unwrap())
        .arg("--kernel")
        .arg(kernel.canonicalize().unwrap())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let log = std::fs::read_to_string(dir.join("kernel_build_log.txt")).unwrap();
    assert!(log.contains("render_image"));
}
