use gen_pipeline::raster::mask::{self, MaskBias, MaskSpec};
use gen_pipeline::{Dimensions, PipelineConfig, resolution};
use proptest::prelude::*;

fn named_target() -> impl Strategy<Value = Dimensions> {
    let all: Vec<Dimensions> = resolution::all().map(|(_, dims)| dims).collect();
    proptest::sample::select(all)
}

proptest! {
    #[test]
    fn padding_conserves_reference_and_matches_target_aspect(
        width in 1u32..2000,
        height in 1u32..2000,
        target in named_target(),
        bias in 0u8..=4,
    ) {
        let reference = Dimensions::new(width, height);
        let bias = MaskBias::new(bias).expect("bias in range");

        match mask::padding_for(reference, target, bias, 0.01) {
            None => prop_assert!((reference.aspect() - target.aspect()).abs() < 0.01),
            Some(padding) => {
                prop_assert_eq!(padding.canvas.width, reference.width + padding.left + padding.right);
                prop_assert_eq!(padding.canvas.height, reference.height + padding.top + padding.bottom);
                prop_assert!(padding.left + padding.right == 0 || padding.top + padding.bottom == 0);

                // 四舍五入误差最多一个像素
                let expected = if padding.left + padding.right > 0 {
                    reference.height as f64 * target.aspect()
                } else {
                    reference.width as f64 / target.aspect()
                };
                let actual = f64::from(if padding.left + padding.right > 0 {
                    padding.canvas.width
                } else {
                    padding.canvas.height
                });
                prop_assert!((actual - expected).abs() <= 1.0, "{actual} vs {expected}");
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn composited_masks_are_two_color_at_target(
        ref_w in 8u32..96,
        ref_h in 8u32..96,
        target_w in 8u32..128,
        target_h in 8u32..128,
        x in -20i64..100,
        y in -20i64..100,
        w in 1i64..120,
        h in 1i64..120,
        bias in 0u8..=4,
    ) {
        let config = PipelineConfig::default();
        let spec = MaskSpec::Rectangle(vec![x, y, w, h]);
        let target = Dimensions::new(target_w, target_h);

        let canonical = mask::composite(
            &spec,
            Dimensions::new(ref_w, ref_h),
            target,
            MaskBias::new(bias).expect("bias in range"),
            &config,
        )
        .expect("composite");

        prop_assert_eq!(canonical.dimensions(), target);
        let pixels = image::load_from_memory(canonical.as_raster().as_bytes())
            .expect("decode mask")
            .to_rgba8();
        prop_assert_eq!(pixels.dimensions(), (target_w, target_h));
        prop_assert!(mask::is_two_color(&pixels));
    }
}
