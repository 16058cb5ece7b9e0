use std::path::PathBuf;

use structopt::StructOpt;

use base::defs::Result;
use base::util::fs;

use crate::import_obj::load_template;

#[derive(StructOpt)]
#[structopt(about = "Validate a template mesh")]
pub struct CheckTemplateCommand {
    #[structopt(help = "Input .obj file", name = "obj-path")]
    obj_path: PathBuf,
}

impl CheckTemplateCommand {
    pub fn run(&self) -> Result<()> {
        let file = fs::open_file(&self.obj_path)?;
        let mesh = load_template(file)?;
        let num_unmapped = mesh.check_topology()?;

        println!(
            "{} source vertices ({} without corner mapping)",
            mesh.source_vertices.len(),
            num_unmapped
        );
        println!("{} corner vertices", mesh.corner_count());
        println!("{} triangles", mesh.triangle_count());

        Ok(())
    }
}
