use clipre::ClipDocument;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();

    let mut path = None;
    let mut canvas_id = None;
    let mut layer_id = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--canvas" => canvas_id = args.next().and_then(|id| id.parse().ok()),
            "--layer" => layer_id = args.next().and_then(|id| id.parse().ok()),
            _ => path = Some(arg),
        }
    }

    let Some(path) = path else {
        eprintln!("usage: clipre-cli <file.clip> [--canvas <id>] [--layer <id>]");
        return ExitCode::FAILURE;
    };

    match run(&path, canvas_id, layer_id) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(path: &str, canvas_id: Option<i64>, layer_id: Option<i64>) -> clipre::Result<()> {
    let doc = ClipDocument::open(path)?;

    let Some(layer_id) = layer_id else {
        for layer in doc.layers() {
            println!(
                "{} (Canvas ID:{} Layer ID:{})",
                layer.name, layer.canvas_id, layer.layer_id
            );
        }

        return Ok(());
    };

    let raster = doc.raster(canvas_id.unwrap_or(1), layer_id)?;
    let Some(bgra) = raster.bgra else {
        println!("Layer does not contain image.");
        return Ok(());
    };

    #[cfg(feature = "png")]
    {
        let stem = std::path::Path::new(path)
            .file_stem()
            .expect("open() accepted the path")
            .to_string_lossy();
        let output = format!("{stem}-{layer_id}.png");

        bgra.to_png(&output)?;
        println!("{output}");
    }

    #[cfg(not(feature = "png"))]
    println!("{}x{}, {} channels", bgra.width, bgra.height, bgra.channels);

    Ok(())
}
