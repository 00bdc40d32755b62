// Compiles the GLSL shaders next to themselves as `<name>.spv`

use std::path::Path;
use std::process::Command;

const SHADERS: &[&str] = &["shaders/simple_shader.vert", "shaders/simple_shader.frag"];

fn main() {
    for shader in SHADERS {
        println!("cargo:rerun-if-changed={}", shader);
        compile_shader(Path::new(shader));
    }
}

fn compile_shader(input: &Path) {
    let mut output = input.as_os_str().to_os_string();
    output.push(".spv");
    let output = Path::new(&output);

    match Command::new("glslc").arg(input).arg("-o").arg(output).status() {
        Ok(status) if status.success() => {}
        Ok(status) => {
            panic!("glslc failed on {}: exit code {:?}", input.display(), status.code());
        }
        Err(e) => {
            // A missing SDK only matters at run time, when the .spv is loaded
            println!(
                "cargo:warning=glslc not found ({}), run: glslc {} -o {}",
                e,
                input.display(),
                output.display()
            );
        }
    }
}
