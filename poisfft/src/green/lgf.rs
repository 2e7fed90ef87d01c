//! Pretabulated lattice Green's function.
//!
//! The kernel file holds the symmetric lattice Green's function of the
//! standard 7-point (5-point in 2-D) Laplacian, computed to 12th-order
//! accuracy: `N^3` doubles in row-major order for 3-D (`N = 64`), `N^2` for
//! 2-D (`N = 32`), in native endianness. Out-of-table lookups fall back to
//! the continuum far field.

use std::io::Read;
use std::path::PathBuf;

/// Environment variable overriding the kernel directory.
pub const KERNEL_PATH_VAR: &str = "POISFFT_KERNEL_PATH";

/// A loaded lattice kernel table.
pub struct LgfTable {
    /// Tabulated extent along each direction.
    pub n: usize,
    /// Problem dimension the table was built for (2 or 3).
    pub dim: usize,
    data: Vec<f64>,
}

impl LgfTable {
    /// Read the kernel file for the given dimension.
    ///
    /// The file `LGF_{dim}d_sym_acc12_{N}.ker` is searched in
    /// `$POISFFT_KERNEL_PATH`, falling back to `./kernels`.
    pub fn load(dim: usize) -> Result<Self, std::io::Error> {
        let n = match dim {
            3 => 64,
            2 => 32,
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("no lattice kernel is available in {} dimensions", dim),
                ))
            }
        };
        let dir = std::env::var(KERNEL_PATH_VAR).unwrap_or_else(|_| "./kernels".to_string());
        let name = format!("LGF_{}d_sym_acc12_{}.ker", dim, n);
        let path: PathBuf = [dir.as_str(), name.as_str()].iter().collect();

        let mut file = std::fs::File::open(&path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("unable to read the lattice kernel file {}", path.display()),
            )
        })?;
        let count = n.pow(dim as u32);
        let mut bytes = vec![0u8; count * std::mem::size_of::<f64>()];
        file.read_exact(&mut bytes)?;
        let data = bytes
            .chunks_exact(8)
            .map(|c| f64::from_ne_bytes(c.try_into().expect("eight bytes per double")))
            .collect();
        Ok(Self { n, dim, data })
    }

    /// Kernel value at the (symmetrized) lattice displacement.
    ///
    /// Inside the table the tabulated value is returned; outside, the
    /// continuum far field `1/(4 pi rho)` (3-D).
    pub fn value(&self, displacement: [usize; 3]) -> f64 {
        let [i, j, k] = displacement;
        if self.dim == 3 {
            if i < self.n && j < self.n && k < self.n {
                self.data[i + self.n * (j + self.n * k)]
            } else {
                let rho = ((i * i + j * j + k * k) as f64).sqrt();
                1.0 / (4.0 * std::f64::consts::PI * rho)
            }
        } else {
            if i < self.n && j < self.n {
                self.data[i + self.n * j]
            } else {
                let rho = ((i * i + j * j) as f64).sqrt();
                -(rho.ln() + crate::special::EULER_GAMMA + 0.5 * (8.0f64).ln())
                    / (2.0 * std::f64::consts::PI)
            }
        }
    }
}
