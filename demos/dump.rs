use std::{env::args, fs::File, io::Read};

use anyhow::{bail, Result};

use sour_pickle as sp;

fn main() -> Result<()> {
    let mut fp = if let Some(fname) = args().nth(1) {
        println!("* Dumping: {fname}\n");
        File::open(fname)?
    } else {
        bail!("Specify pickle filename!");
    };
    let mut buf = Vec::with_capacity(fp.metadata().map(|md| md.len() as usize).unwrap_or(16384));
    let _ = fp.read_to_end(&mut buf)?;

    println!("* Ops:");
    let mut rdr = sp::OpReader::new(buf.as_slice());
    loop {
        match rdr.next_op() {
            Ok(Some((offset, op))) => println!("{offset:>8}: {op:?}"),
            Ok(None) => break,
            Err(e) => {
                println!("ERROR: {e}");
                break;
            }
        }
    }

    println!("\n* Value:");
    match sp::decode(buf.as_slice()) {
        Ok(pickle) => {
            let obj: sp::Object = pickle.unpack()?;
            println!("{obj:#?}");
        }
        Err(e) => println!("ERROR: {e}"),
    }
    Ok(())
}
