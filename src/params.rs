//! Image generation parameter builder

use rand::Rng;

use crate::wire::generation::{
    CutoutParameters, DiffusionSampler, GuidanceInstanceParameters, GuidanceParameters, GuidancePreset,
    ImageParameters, MaskedAreaInit, SamplerParameters, ScheduleParameters, StepParameter,
};

/// Upper bound (exclusive) of randomly drawn seeds
const MAX_SEED: u32 = 4_294_967_295;

/// Named, independently defaulted image parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ImageParams {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub seeds: Vec<u32>,
    pub samples: u32,
    pub cfg_scale: f32,
    pub sampler: DiffusionSampler,
    pub init_strength: f32,
    pub init_noise_scale: f32,
    /// Unset means the calling operation's default
    pub masked_area_init: Option<MaskedAreaInit>,
    pub guidance_preset: GuidancePreset,
    pub guidance_cuts: u32,
    pub guidance_strength: f32,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            steps: 50,
            seeds: Vec::new(),
            samples: 1,
            cfg_scale: 7.0,
            sampler: DiffusionSampler::KLms,
            init_strength: 0.0,
            init_noise_scale: 1.0,
            masked_area_init: None,
            guidance_preset: GuidancePreset::None,
            guidance_cuts: 0,
            guidance_strength: 0.0,
        }
    }
}

impl ImageParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn seed(mut self, seed: u32) -> Self {
        self.seeds = vec![seed];
        self
    }

    pub fn seeds(mut self, seeds: Vec<u32>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn cfg_scale(mut self, cfg_scale: f32) -> Self {
        self.cfg_scale = cfg_scale;
        self
    }

    pub fn sampler(mut self, sampler: DiffusionSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn init_strength(mut self, init_strength: f32) -> Self {
        self.init_strength = init_strength;
        self
    }

    pub fn init_noise_scale(mut self, init_noise_scale: f32) -> Self {
        self.init_noise_scale = init_noise_scale;
        self
    }

    pub fn masked_area_init(mut self, masked_area_init: MaskedAreaInit) -> Self {
        self.masked_area_init = Some(masked_area_init);
        self
    }

    pub fn guidance(mut self, preset: GuidancePreset, cuts: u32, strength: f32) -> Self {
        self.guidance_preset = preset;
        self.guidance_cuts = cuts;
        self.guidance_strength = strength;
        self
    }

    /// Build the wire parameter block for generation. An unset seed (empty,
    /// or the single seed 0) draws one random seed.
    pub fn build(&self) -> ImageParameters {
        self.build_with_masked_default(MaskedAreaInit::Original)
    }

    /// Build with `masked_default` used when no masked area init was set
    pub fn build_with_masked_default(&self, masked_default: MaskedAreaInit) -> ImageParameters {
        let seed = match self.seeds.as_slice() {
            [] | [0] => vec![rand::thread_rng().gen_range(0..MAX_SEED)],
            seeds => seeds.to_vec(),
        };

        let schedule_start = 1.0 - self.init_strength;
        let schedule = if schedule_start != 1.0 {
            Some(ScheduleParameters { start: Some(schedule_start), end: None })
        } else {
            None
        };

        let guidance = if self.guidance_preset != GuidancePreset::None {
            let cutouts = if self.guidance_cuts != 0 {
                Some(CutoutParameters { count: self.guidance_cuts })
            } else {
                None
            };
            let guidance_strength = if self.guidance_strength == 0.0 {
                None
            } else {
                Some(self.guidance_strength)
            };
            Some(GuidanceParameters {
                guidance_preset: self.guidance_preset,
                instances: vec![GuidanceInstanceParameters { cutouts, guidance_strength }],
            })
        } else {
            None
        };

        ImageParameters {
            height: self.height,
            width: self.width,
            seed,
            samples: self.samples,
            steps: self.steps,
            sampler: self.sampler,
            masked_area_init: self.masked_area_init.unwrap_or(masked_default),
            parameters: vec![StepParameter {
                scaled_step: 0.0,
                sampler: Some(SamplerParameters {
                    cfg_scale: self.cfg_scale,
                    init_noise_scale: self.init_noise_scale,
                }),
                schedule,
                guidance,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_build_minimal_step() {
        let params = ImageParams::new().seed(42).build();
        assert_eq!(params.width, 512);
        assert_eq!(params.height, 512);
        assert_eq!(params.steps, 50);
        assert_eq!(params.seed, vec![42]);
        assert_eq!(params.sampler, DiffusionSampler::KLms);

        let step = &params.parameters[0];
        assert_eq!(step.sampler, Some(SamplerParameters { cfg_scale: 7.0, init_noise_scale: 1.0 }));
        assert!(step.schedule.is_none());
        assert!(step.guidance.is_none());
    }

    #[test]
    fn test_zero_seed_draws_random() {
        let params = ImageParams::new().seed(0).build();
        assert_eq!(params.seed.len(), 1);
        let params = ImageParams::new().build();
        assert_eq!(params.seed.len(), 1);
    }

    #[test]
    fn test_explicit_zero_seed_list_is_kept() {
        let params = ImageParams::new().seeds(vec![0, 0]).build();
        assert_eq!(params.seed, vec![0, 0]);
        let params = ImageParams::new().seeds(vec![0, 7]).build();
        assert_eq!(params.seed, vec![0, 7]);
    }

    #[test]
    fn test_masked_area_init_default_per_operation() {
        let params = ImageParams::new().seed(1);
        assert_eq!(params.build().masked_area_init, MaskedAreaInit::Original);
        assert_eq!(params.build_with_masked_default(MaskedAreaInit::Zero).masked_area_init, MaskedAreaInit::Zero);

        let chosen = params.masked_area_init(MaskedAreaInit::RandomNoise);
        assert_eq!(chosen.build_with_masked_default(MaskedAreaInit::Zero).masked_area_init, MaskedAreaInit::RandomNoise);
    }

    #[test]
    fn test_init_strength_sets_schedule() {
        let params = ImageParams::new().seed(1).init_strength(0.25).build();
        let schedule = params.parameters[0].schedule.clone().unwrap();
        assert_eq!(schedule.start, Some(0.75));
    }

    #[test]
    fn test_guidance_fields_are_independent() {
        let params = ImageParams::new().seed(1).guidance(GuidancePreset::Simple, 0, 0.0).build();
        let guidance = params.parameters[0].guidance.clone().unwrap();
        assert_eq!(guidance.guidance_preset, GuidancePreset::Simple);
        assert_eq!(guidance.instances[0].cutouts, None);
        assert_eq!(guidance.instances[0].guidance_strength, None);

        let params = ImageParams::new().seed(1).guidance(GuidancePreset::FastBlue, 4, 0.3).build();
        let guidance = params.parameters[0].guidance.clone().unwrap();
        assert_eq!(guidance.instances[0].cutouts, Some(CutoutParameters { count: 4 }));
        assert_eq!(guidance.instances[0].guidance_strength, Some(0.3));
    }
}
