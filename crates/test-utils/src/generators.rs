//! Test data generators for synthetic cutout variables.
//!
//! These generators create predictable, verifiable patterns that can be
//! used across the test suite.

use geo_cutout::Lithology;

/// Creates a test grid with predictable values.
///
/// Each cell value is calculated as: `col * 1000 + row`
///
/// This makes it easy to verify that data is being merged correctly by
/// checking that grid[row * width + col] == col * 1000 + row.
///
/// # Example
///
/// ```
/// use test_utils::create_test_grid;
///
/// let grid = create_test_grid(10, 5);
/// assert_eq!(grid.len(), 50); // 10 * 5
/// assert_eq!(grid[0], 0.0);   // col=0, row=0 -> 0*1000 + 0
/// assert_eq!(grid[1], 1000.0); // col=1, row=0 -> 1*1000 + 0
/// assert_eq!(grid[10], 1.0);  // col=0, row=1 -> 0*1000 + 1
/// ```
pub fn create_test_grid(width: usize, height: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f64);
        }
    }
    data
}

/// Free-text descriptions in every supported shape, cycled by the
/// lithology generators.
pub const SAMPLE_DESCRIPTIONS: [&str; 6] = [
    "Major:{sandstone} Minor:{shale,clay}",
    "limestone [92%] dolomite [8%]",
    "weathered rock and debris",
    "Major:{granite} Minor:{gneiss, schist, quartzite, pegmatite}",
    "clay [30%] silt [30%] sand [40%]",
    "",
];

/// Colours paired with [`SAMPLE_DESCRIPTIONS`].
pub const SAMPLE_COLORS: [[u8; 3]; 6] = [
    [237, 201, 175],
    [120, 160, 200],
    [90, 90, 90],
    [200, 30, 60],
    [255, 255, 255],
    [0, 0, 0],
];

/// Creates `n` lithology cells cycling through the sample descriptions.
///
/// The last sample is an empty composition without a colour, so grids
/// always include cells with every slot absent.
pub fn create_lithology_cells(n: usize) -> Vec<Lithology> {
    (0..n)
        .map(|i| {
            let k = i % SAMPLE_DESCRIPTIONS.len();
            let mut lith = Lithology::from_description(SAMPLE_DESCRIPTIONS[k]);
            if !lith.is_empty() {
                lith.add_color(SAMPLE_COLORS[k]);
                // A second observation makes the colour a real running mean.
                lith.add_color([(i % 256) as u8, 0, 0]);
            }
            lith
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_grid() {
        let grid = create_test_grid(3, 2);
        assert_eq!(grid, vec![0.0, 1000.0, 2000.0, 1.0, 1001.0, 2001.0]);
    }

    #[test]
    fn test_lithology_cells_cover_all_shapes() {
        let cells = create_lithology_cells(6);
        assert_eq!(cells[0].major(), Some("sandstone"));
        assert_eq!(cells[1].major(), Some("limestone"));
        assert_eq!(cells[2].others(), ["weathered", "rock", "debris"]);
        assert_eq!(cells[3].minors().len(), 4);
        assert_eq!(cells[4].major(), None);
        assert!(cells[5].is_empty());
        assert_eq!(cells[5].color_samples(), 0);
    }
}
