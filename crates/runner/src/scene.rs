//! Dam-break scene: a static wall shell around the container and a fluid
//! block, filled on a lattice at the particle gap.

use engine::{ParticleInfo, Real};
use tracing::info;

use crate::config::SceneConfig;

/// Color tag of wall particles.
pub const WALL_COLOR: i32 = 0;
/// Color tag of fluid particles.
pub const FLUID_COLOR: i32 = 1;

/// Particles of a generated scene, walls and fluid interleaved in lattice
/// order.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    /// Every particle to ingest.
    pub particles: Vec<ParticleInfo>,
    /// How many are walls.
    pub walls: usize,
    /// How many are fluid.
    pub fluid: usize,
}

/// Lattice coordinates `start + k * gap` strictly below `end`.
fn axis_points(start: Real, end: Real, gap: Real) -> Vec<Real> {
    let count = ((end - start) / gap).ceil().max(0.0) as usize;
    (0..count)
        .map(|k| start + k as Real * gap)
        .filter(|&v| v < end)
        .collect()
}

fn inside(p: &[Real; 3], min: &[Real; 3], max: &[Real; 3]) -> bool {
    (0..3).all(|axis| p[axis] >= min[axis] && p[axis] <= max[axis])
}

/// Fill the padded container box at spacing `gap`. Lattice points outside
/// the container become static wall particles; points inside the fluid block
/// become fluid; the rest of the container stays empty.
pub fn dam_break(scene: &SceneConfig, h: Real, gap: Real) -> Scene {
    let wall = scene.wall_factor * h;
    let lo = scene.container_min;
    let hi = scene.container_max;
    let xs = axis_points(lo[0] - wall, hi[0] + wall, gap);
    let ys = axis_points(lo[1] - wall, hi[1] + wall, gap);
    let zs = axis_points(lo[2] - wall, hi[2] + wall, gap);

    let mut out = Scene::default();
    for &z in &zs {
        for &y in &ys {
            for &x in &xs {
                let p = [x, y, z];
                if !inside(&p, &lo, &hi) {
                    out.particles
                        .push(ParticleInfo::boundary(p).with_color(WALL_COLOR));
                    out.walls += 1;
                } else if inside(&p, &scene.fluid_min, &scene.fluid_max) {
                    out.particles
                        .push(ParticleInfo::fluid(p).with_color(FLUID_COLOR));
                    out.fluid += 1;
                }
            }
        }
    }

    info!(
        walls = out.walls,
        fluid = out.fluid,
        "dam break scene generated"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_scene() -> SceneConfig {
        SceneConfig {
            container_min: [0.0; 3],
            container_max: [1.0, 0.5, 0.5],
            fluid_min: [0.0; 3],
            fluid_max: [0.4, 0.5, 0.5],
            wall_factor: 1.1,
        }
    }

    #[test]
    fn axis_points_stop_before_end() {
        let pts = axis_points(0.0, 1.0, 0.25);
        assert_eq!(pts, vec![0.0, 0.25, 0.5, 0.75]);
        assert!(axis_points(1.0, 0.0, 0.25).is_empty());
    }

    #[test]
    fn walls_surround_the_container() {
        let config = small_scene();
        let scene = dam_break(&config, 0.1, 0.05);
        assert_eq!(scene.walls + scene.fluid, scene.particles.len());
        assert!(scene.walls > 0 && scene.fluid > 0);

        for info in &scene.particles {
            let p = info.position;
            if info.flags.is_static() {
                assert_eq!(info.color, WALL_COLOR);
                assert!(!inside(&p, &config.container_min, &config.container_max));
            } else {
                assert_eq!(info.color, FLUID_COLOR);
                assert!(inside(&p, &config.fluid_min, &config.fluid_max));
            }
        }
    }

    #[test]
    fn fluid_block_is_a_full_lattice() {
        let scene = dam_break(&small_scene(), 0.1, 0.05);
        // The lattice starts at -0.11, so fluid sits at 0.04, 0.09, ...
        // 8 points up to 0.39 in x, 10 up to 0.49 in y and z.
        assert_eq!(scene.fluid, 8 * 10 * 10);
    }

    #[test]
    fn wall_is_at_least_one_cell_thick() {
        let config = small_scene();
        let h = 0.1;
        let scene = dam_break(&config, h, 0.05);
        let floor = scene
            .particles
            .iter()
            .filter(|i| i.flags.is_static())
            .map(|i| i.position[1])
            .fold(Real::INFINITY, Real::min);
        assert!(floor <= config.container_min[1] - h);
    }
}
