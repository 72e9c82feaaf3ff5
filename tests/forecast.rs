use rand::rngs::StdRng;
use rand::SeedableRng;
use xlstm_time::models::xlstm_time::ENCODER_CONT;
use xlstm_time::nn::{Decomposer, SeriesDecomposition};
use xlstm_time::tensor::{ops, Tensor};
use xlstm_time::{
    BaseModel, Batch, DatasetDescriptor, HiddenState, ModelError, Module, TensorError, XLstmTime, XLstmTimeConfig,
    XLstmType,
};

const BATCH: usize = 4;
const TIME: usize = 30;
const FEATURES: usize = 6;
const HIDDEN: usize = 16;
const OUTPUT: usize = 5;

fn encoder_input(seed: u64, features: usize) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    xlstm_time::tensor::rand(&[BATCH, TIME, features], &mut rng)
}

fn batch(encoder_cont: Tensor) -> Batch {
    Batch::from([(ENCODER_CONT.to_string(), encoder_cont)])
}

fn build(variant: &str, seed: u64) -> XLstmTime {
    let config = XLstmTimeConfig::new(FEATURES, HIDDEN, OUTPUT)
        .with_xlstm_type(variant)
        .with_seed(seed);
    XLstmTime::new(config).unwrap()
}

#[test]
fn both_variants_forecast_one_row_per_series() {
    let x = batch(encoder_input(0, FEATURES));
    for (variant, expected) in [("slstm", XLstmType::SLstm), ("mlstm", XLstmType::MLstm)] {
        let model = build(variant, 1);
        assert_eq!(model.variant(), expected);
        let output = BaseModel::forward(&model, &x, None).unwrap();
        assert_eq!(output.prediction.shape(), &[BATCH, OUTPUT]);
        assert!(output.prediction.to_vec().iter().all(|v| v.is_finite()));
        // each series gets a (OUTPUT,) forecast
        let first = ops::select(&output.prediction, 0, 0).unwrap();
        assert_eq!(first.shape(), &[OUTPUT]);
    }
}

#[test]
fn forecasts_are_deterministic_for_a_seed() {
    let x = batch(encoder_input(2, FEATURES));
    for variant in ["slstm", "mlstm"] {
        let a = build(variant, 7);
        let b = build(variant, 7);
        a.eval();
        b.eval();
        let first = BaseModel::forward(&a, &x, None).unwrap().prediction;
        let again = BaseModel::forward(&a, &x, None).unwrap().prediction;
        let twin = BaseModel::forward(&b, &x, None).unwrap().prediction;
        assert!(first.all_close(&again, 0.0));
        assert!(first.all_close(&twin, 0.0));
    }
}

#[test]
fn unknown_variant_fails_at_construction() {
    let config = XLstmTimeConfig::new(FEATURES, HIDDEN, OUTPUT).with_xlstm_type("gru");
    match XLstmTime::new(config) {
        Err(ModelError::InvalidVariant(name)) => assert_eq!(name, "gru"),
        other => panic!("expected InvalidVariant, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn projector_width_is_fixed_by_the_first_batch() {
    let model = build("slstm", 3);
    assert_eq!(model.projector_in_features(), None);
    BaseModel::forward(&model, &batch(encoder_input(0, FEATURES)), None).unwrap();
    assert_eq!(model.projector_in_features(), Some(2 * FEATURES));

    let err = BaseModel::forward(&model, &batch(encoder_input(0, FEATURES - 2)), None).unwrap_err();
    assert!(matches!(err, ModelError::Tensor(TensorError::ShapeMismatch { .. })));
    assert_eq!(model.projector_in_features(), Some(2 * FEATURES));
}

#[test]
fn carried_state_is_used() {
    for variant in ["slstm", "mlstm"] {
        let model = build(variant, 5);
        model.eval();
        let x = batch(encoder_input(4, FEATURES));
        let first = BaseModel::forward(&model, &x, None).unwrap();
        let fresh = BaseModel::forward(&model, &x, None).unwrap();
        let carried = BaseModel::forward(&model, &x, Some(first.hidden_state.clone())).unwrap();

        assert_eq!(carried.hidden_state.arity(), first.hidden_state.arity());
        assert!(fresh.prediction.all_close(&first.prediction, 0.0));
        assert!(!carried.prediction.all_close(&first.prediction, 1e-6));
    }
}

#[test]
fn state_from_the_other_variant_is_rejected() {
    let scalar = build("slstm", 1);
    let matrix = build("mlstm", 1);
    let x = batch(encoder_input(0, FEATURES));
    let matrix_state = BaseModel::forward(&matrix, &x, None).unwrap().hidden_state;
    assert_eq!(matrix_state.arity(), 3);
    let err = BaseModel::forward(&scalar, &x, Some(matrix_state)).unwrap_err();
    assert!(matches!(err, ModelError::HiddenStateArity { expected: 2, got: 3, .. }));
    assert!(BaseModel::forward(&scalar, &x, Some(HiddenState::new(Vec::new()))).is_err());
}

#[test]
fn repeated_calls_without_state_start_fresh() {
    for variant in ["slstm", "mlstm"] {
        let model = build(variant, 9);
        model.eval();
        let x = batch(encoder_input(3, FEATURES));
        let reference = BaseModel::forward(&model, &x, None).unwrap();
        for _ in 0..10 {
            let output = BaseModel::forward(&model, &x, None).unwrap();
            assert_eq!(output.prediction.shape(), &[BATCH, OUTPUT]);
            assert_eq!(output.hidden_state.parts()[0].shape(), &[1, BATCH, HIDDEN]);
            // nothing from earlier calls leaks into a stateless one
            assert!(output.prediction.all_close(&reference.prediction, 0.0));
            for (part, expected) in output.hidden_state.parts().iter().zip(reference.hidden_state.parts()) {
                assert!(part.all_close(expected, 0.0));
            }
        }
    }
}

#[test]
fn shape_laws_hold_through_the_pipeline() {
    let x = encoder_input(1, FEATURES);
    let decomposition = SeriesDecomposition::new(25).unwrap();
    let (trend, seasonal) = decomposition.decompose(&x).unwrap();
    let fused = ops::cat(&[trend, seasonal], 2).unwrap();
    assert_eq!(fused.shape(), &[BATCH, TIME, decomposition.component_count() * FEATURES]);

    let scalar = build("slstm", 2);
    let state = BaseModel::forward(&scalar, &batch(x.clone()), None).unwrap().hidden_state;
    assert_eq!(state.arity(), 2);
    assert!(state.parts().iter().all(|p| p.shape() == [1, BATCH, HIDDEN]));

    let matrix = build("mlstm", 2);
    let state = BaseModel::forward(&matrix, &batch(x), None).unwrap().hidden_state;
    assert_eq!(state.parts()[0].shape(), &[1, BATCH, HIDDEN]);
    assert_eq!(state.parts()[1].shape(), &[1, BATCH, HIDDEN, HIDDEN]);
    assert_eq!(state.parts()[2].shape(), &[1, BATCH, HIDDEN]);
}

#[test]
fn deep_backbones_and_short_windows_keep_the_horizon() {
    for variant in ["slstm", "mlstm"] {
        let config = XLstmTimeConfig::new(3, 8, 2)
            .with_xlstm_type(variant)
            .with_num_layers(3)
            .with_decomposition_kernel(4)
            .with_input_projection_size(12)
            .with_seed(0);
        let model = XLstmTime::new(config).unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        let x = xlstm_time::tensor::rand(&[2, 3, 3], &mut rng);
        let output = model.predict(&x, None).unwrap();
        assert_eq!(output.prediction.shape(), &[2, 2]);
        assert_eq!(output.hidden_state.parts()[0].shape(), &[3, 2, 8]);
        assert_eq!(model.projector_in_features(), Some(6));
    }
}

#[test]
fn module_forward_returns_the_prediction() {
    let model = build("mlstm", 4);
    model.eval();
    let x = encoder_input(3, FEATURES);
    let via_module = Module::forward(&model, &x).unwrap();
    let via_batch = BaseModel::forward(&model, &batch(x), None).unwrap().prediction;
    assert!(via_module.all_close(&via_batch, 0.0));
}

#[test]
fn widths_come_from_the_dataset() {
    let dataset = DatasetDescriptor {
        target: vec!["load".to_string()],
        time_varying_known_reals: vec!["hour".to_string(), "temperature".to_string()],
        time_varying_unknown_reals: vec!["load".to_string()],
        max_encoder_length: TIME,
        max_prediction_length: 1,
        ..Default::default()
    };
    let template = XLstmTimeConfig::new(0, HIDDEN, 0).with_xlstm_type("mlstm").with_seed(0);
    let model = XLstmTime::from_dataset(&dataset, template).unwrap();
    assert_eq!(model.hparams().input_size, 3);
    assert_eq!(model.hparams().output_size, 1);

    let x = xlstm_time::tensor::rand(&[BATCH, TIME, 3], &mut StdRng::seed_from_u64(0));
    let prediction = model.predict(&x, None).unwrap().prediction;
    assert_eq!(prediction.shape(), &[BATCH, 1]);
    let target = xlstm_time::tensor::zeros(&[BATCH, 1]);
    assert!(model.loss_on(&prediction, &target).unwrap() >= 0.0);
}
