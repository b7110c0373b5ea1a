// tests/assets_and_cli.rs
// Asset directory loading and the mlaa binary's front end, end to end on disk.

use std::fs;
use std::path::Path;

use image::{GrayImage, Luma, Rgba, RgbaImage};
use mlaa::assets::{AREA_TABLE_FILE, SEARCH_TABLE_FILE, SHADER_FILE};
use mlaa::cli::run_cli;
use mlaa::util::{read_png_rgba8, write_png_rgba8};
use mlaa::{AssetSource, DirectoryAssets, LookupFormat, MlaaError, BUILTIN_WGSL};

fn write_tables(dir: &Path) {
    RgbaImage::from_pixel(10, 5, Rgba([128, 0, 0, 128]))
        .save(dir.join(AREA_TABLE_FILE))
        .unwrap();
    GrayImage::from_pixel(16, 1, Luma([255]))
        .save(dir.join(SEARCH_TABLE_FILE))
        .unwrap();
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn directory_tables_load_at_native_size() {
    let dir = tempfile::tempdir().unwrap();
    write_tables(dir.path());
    let assets = DirectoryAssets::new(dir.path());

    let area = assets.area_table().unwrap();
    assert_eq!((area.width(), area.height(), area.format()), (10, 5, LookupFormat::Rgba8));
    assert_eq!(area.texel(9, 4), &[128, 0, 0, 128]);

    let search = assets.search_table().unwrap();
    assert_eq!((search.width(), search.height(), search.format()), (16, 1, LookupFormat::R8));
    assert_eq!(search.texel(15, 0), &[255]);
}

#[test]
fn directory_falls_back_to_builtin_program() {
    let dir = tempfile::tempdir().unwrap();
    let assets = DirectoryAssets::new(dir.path());
    assert_eq!(assets.shader_code().unwrap(), BUILTIN_WGSL);

    fs::write(dir.path().join(SHADER_FILE), "// custom").unwrap();
    assert_eq!(assets.shader_code().unwrap(), "// custom");
}

#[test]
fn directory_reports_missing_and_mismatched_tables() {
    let dir = tempfile::tempdir().unwrap();
    let assets = DirectoryAssets::new(dir.path());
    assert!(matches!(assets.area_table(), Err(MlaaError::Asset(_))));

    // Tables swapped: the area file is single-channel
    GrayImage::from_pixel(5, 5, Luma([0]))
        .save(dir.path().join(AREA_TABLE_FILE))
        .unwrap();
    let err = assets.area_table().unwrap_err();
    assert!(err.to_string().contains("channels"), "{err}");
}

#[test]
fn cli_antialiases_a_png() {
    let dir = tempfile::tempdir().unwrap();
    write_tables(dir.path());

    let (w, h) = (6u32, 4u32);
    let rgba: Vec<u8> = (0..w * h)
        .flat_map(|i| if i % w < 3 { [0, 0, 0, 255] } else { [255, 255, 255, 255] })
        .collect();
    let input = dir.path().join("in.png");
    let output = dir.path().join("out.png");
    let edges = dir.path().join("edges.png");
    write_png_rgba8(&input, &rgba, w, h).unwrap();

    run_cli(&args(&[
        input.to_str().unwrap(),
        output.to_str().unwrap(),
        "--assets",
        dir.path().to_str().unwrap(),
        "--edges",
        edges.to_str().unwrap(),
        "--policy",
        "strict",
    ]))
    .unwrap();

    let result = read_png_rgba8(&output).unwrap();
    assert_eq!((result.width, result.height), (w, h));
    // Only the two columns around the boundary change
    for y in 0..h {
        for x in 0..w {
            let i = ((y * w + x) * 4) as usize;
            let changed = result.data[i..i + 4] != rgba[i..i + 4];
            assert_eq!(changed, x == 2 || x == 3, "pixel ({x},{y})");
        }
    }

    let edge_map = read_png_rgba8(&edges).unwrap();
    let i = (3 * 4) as usize;
    assert_eq!(&edge_map.data[i..i + 4], &[255, 0, 0, 255]);
}

#[test]
fn cli_depth_mode_needs_matching_depth_image() {
    let dir = tempfile::tempdir().unwrap();
    write_tables(dir.path());
    let input = dir.path().join("in.png");
    let depth = dir.path().join("depth.png");
    write_png_rgba8(&input, &[100; 4 * 4 * 4], 4, 4).unwrap();
    write_png_rgba8(&depth, &[100; 2 * 2 * 4], 2, 2).unwrap();

    let err = run_cli(&args(&[
        input.to_str().unwrap(),
        dir.path().join("out.png").to_str().unwrap(),
        "--assets",
        dir.path().to_str().unwrap(),
        "--mode",
        "depth",
        "--depth",
        depth.to_str().unwrap(),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("depth image is 2x2"), "{err}");
}

#[test]
fn cli_rejects_bad_invocations() {
    assert!(run_cli(&args(&["only-one.png"])).is_err());
    assert!(run_cli(&args(&["a.png", "b.png", "--assets", "nowhere", "--threshold", "2"])).is_err());
    assert!(run_cli(&args(&["--help"])).is_ok());
}
